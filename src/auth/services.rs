use lazy_static::lazy_static;
use regex::Regex;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::{
    auth::{
        dto::RegisterRequest,
        jwt::JwtKeys,
        password::{hash_password, verify_password},
        repo::UserStore,
        repo_types::{NewUser, Role, User},
    },
    config::BootstrapAdmin,
    error::{AppError, AppResult, ValidationErrors},
};

const EMAIL_MAX: usize = 100;
const PASSWORD_MIN: usize = 6;
const PASSWORD_MAX: usize = 128;
const NAME_MAX: usize = 50;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Registration input after trimming, lower-casing and default-filling.
#[derive(Debug, Clone)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub display_name: Option<String>,
    pub family_name: Option<String>,
    pub role: Role,
}

fn optional_name(
    field: &str,
    value: Option<String>,
    errors: &mut ValidationErrors,
) -> Option<String> {
    let value = value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())?;
    if value.chars().count() > NAME_MAX {
        errors.add(field, format!("{field} cannot exceed {NAME_MAX} characters"));
    }
    Some(value)
}

/// Checks every registration field and reports all violations at once.
pub fn validate_registration(req: RegisterRequest) -> AppResult<Registration> {
    let mut errors = ValidationErrors::new();

    let email = normalize_email(req.email.as_deref().unwrap_or_default());
    if email.is_empty() {
        errors.add("email", "email is required");
    } else if email.chars().count() > EMAIL_MAX {
        errors.add("email", format!("email cannot exceed {EMAIL_MAX} characters"));
    } else if !is_valid_email(&email) {
        errors.add("email", "email is not a valid address");
    }

    let password = req.password.unwrap_or_default();
    let len = password.chars().count();
    if password.is_empty() {
        errors.add("password", "password is required");
    } else if len < PASSWORD_MIN {
        errors.add("password", format!("password must be at least {PASSWORD_MIN} characters"));
    } else if len > PASSWORD_MAX {
        errors.add("password", format!("password cannot exceed {PASSWORD_MAX} characters"));
    }

    let display_name = optional_name("displayName", req.display_name, &mut errors);
    let family_name = optional_name("familyName", req.family_name, &mut errors);

    let role = match req.role.as_deref().map(str::trim) {
        None | Some("") => Role::default(),
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            errors.add("role", "role must be one of admin, agent, user");
            Role::default()
        }),
    };

    errors.into_result(Registration {
        email,
        password,
        display_name,
        family_name,
        role,
    })
}

/// Hashes the password and stores the identity. Fails with `DuplicateEmail` on a taken email.
pub async fn create_identity(users: &dyn UserStore, reg: Registration) -> AppResult<User> {
    if users.find_by_email(&reg.email, false).await?.is_some() {
        warn!(email = %reg.email, "email already registered");
        return Err(AppError::DuplicateEmail);
    }

    let password_hash = hash_password(&reg.password)?;
    let user = users
        .insert(NewUser {
            email: reg.email,
            password_hash,
            display_name: reg.display_name,
            family_name: reg.family_name,
            role: reg.role,
            active: true,
        })
        .await?;

    info!(user_id = %user.id, email = %user.email, role = %user.role, "user registered");
    Ok(user)
}

/// Checks credentials against an active identity, stamps last access and issues a token.
pub async fn authenticate(
    users: &dyn UserStore,
    keys: &JwtKeys,
    email: &str,
    password: &str,
) -> AppResult<(User, String)> {
    let email = normalize_email(email);
    if email.is_empty() || password.is_empty() {
        return Err(AppError::BadRequest("email and password are required".into()));
    }

    let Some(mut user) = users.find_by_email(&email, true).await? else {
        warn!(email = %email, "login unknown or inactive email");
        return Err(AppError::Authentication("invalid credentials".into()));
    };

    if !verify_password(password, &user.password_hash)? {
        warn!(email = %email, user_id = %user.id, "login invalid password");
        return Err(AppError::Authentication("invalid credentials".into()));
    }

    let now = OffsetDateTime::now_utc();
    users.touch_last_access(user.id, now).await?;
    user.last_access_at = Some(now);

    let token = keys.issue(&user)?;
    info!(user_id = %user.id, email = %user.email, "user logged in");
    Ok((user, token))
}

/// Makes sure the configured admin identity exists.
pub async fn ensure_admin(users: &dyn UserStore, admin: &BootstrapAdmin) -> AppResult<()> {
    let reg = validate_registration(RegisterRequest {
        email: Some(admin.email.clone()),
        password: Some(admin.password.clone()),
        role: Some(Role::Admin.as_str().into()),
        ..Default::default()
    })?;

    if users.find_by_email(&reg.email, false).await?.is_some() {
        info!(email = %reg.email, "bootstrap admin already present");
        return Ok(());
    }
    match create_identity(users, reg).await {
        Ok(_) | Err(AppError::DuplicateEmail) => Ok(()),
        Err(e) => Err(e),
    }
}
