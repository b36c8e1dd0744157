use argon2::{
    Argon2, PasswordHasher,
    password_hash::{PasswordHash, PasswordVerifier, SaltString},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{EncodingKey, Header, encode};
use password_hash::rand_core::OsRng;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, Set,
};
use uuid::Uuid;

use crate::{
    audit::{UserAction, log_user_action_lossy},
    dto::auth::{Claims, LoginRequest, LoginResponse, RegisterRequest, UpdateProfileRequest},
    entity::users::{ActiveModel as UserActive, Column as UserCol, Entity as Users},
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ClientInfo},
    models::User,
    response::{ApiResponse, Meta},
    state::JwtSettings,
};

const MIN_PASSWORD_LEN: usize = 6;

pub async fn register_user<C>(
    db: &C,
    client: ClientInfo,
    payload: RegisterRequest,
) -> AppResult<ApiResponse<User>>
where
    C: ConnectionTrait,
{
    let username = payload.username.trim().to_string();
    let email = payload.email.trim().to_lowercase();

    if username.is_empty() {
        return Err(AppError::validation("username is required"));
    }
    if !email.contains('@') {
        return Err(AppError::validation("email is invalid"));
    }
    if payload.password.len() < MIN_PASSWORD_LEN {
        return Err(AppError::validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let taken = Users::find()
        .filter(
            Condition::any()
                .add(UserCol::Username.eq(username.as_str()))
                .add(UserCol::Email.eq(email.as_str())),
        )
        .count(db)
        .await?;
    if taken > 0 {
        return Err(AppError::validation("username or email is already taken"));
    }

    let password_hash = hash_password(&payload.password)?;

    let user = UserActive {
        id: Set(Uuid::new_v4()),
        username: Set(username),
        email: Set(email),
        password_hash: Set(password_hash),
        is_admin: Set(false),
        is_active: Set(true),
        phone: Set(None),
        address: Set(None),
        created_at: Set(Utc::now().into()),
        last_login: Set(None),
    }
    .insert(db)
    .await?;

    let actor = AuthUser {
        user_id: user.id,
        is_admin: false,
        client,
    };
    log_user_action_lossy(db, &actor, UserAction::Register, None, None).await;
    tracing::info!(user_id = %user.id, "user registered");

    Ok(ApiResponse::success("User created", User::from(user), None))
}

pub async fn login_user<C>(
    db: &C,
    jwt: &JwtSettings,
    client: ClientInfo,
    payload: LoginRequest,
) -> AppResult<ApiResponse<LoginResponse>>
where
    C: ConnectionTrait,
{
    let login = payload.login.trim();
    let user = Users::find()
        .filter(
            Condition::any()
                .add(UserCol::Username.eq(login))
                .add(UserCol::Email.eq(login.to_lowercase())),
        )
        .one(db)
        .await?
        .ok_or(AppError::Unauthorized)?;

    let parsed_hash = PasswordHash::new(&user.password_hash)
        .map_err(|_| AppError::Internal(anyhow::anyhow!("Invalid password hash")))?;

    if Argon2::default()
        .verify_password(payload.password.as_bytes(), &parsed_hash)
        .is_err()
    {
        tracing::debug!(user_id = %user.id, "password mismatch");
        return Err(AppError::Unauthorized);
    }

    if !user.is_active {
        return Err(AppError::Forbidden);
    }

    let actor = AuthUser {
        user_id: user.id,
        is_admin: user.is_admin,
        client,
    };
    let token = issue_token(jwt, &actor)?;

    let mut active: UserActive = user.into();
    active.last_login = Set(Some(Utc::now().into()));
    let user = active.update(db).await?;

    log_user_action_lossy(db, &actor, UserAction::Login, None, None).await;

    let resp = LoginResponse {
        token: format!("Bearer {}", token),
        user: User::from(user),
    };
    Ok(ApiResponse::success("Logged in", resp, Some(Meta::empty())))
}

pub async fn me<C>(db: &C, user: &AuthUser) -> AppResult<ApiResponse<User>>
where
    C: ConnectionTrait,
{
    let model = Users::find_by_id(user.user_id)
        .one(db)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(ApiResponse::ok("OK", User::from(model)))
}

pub async fn update_profile<C>(
    db: &C,
    user: &AuthUser,
    payload: UpdateProfileRequest,
) -> AppResult<ApiResponse<User>>
where
    C: ConnectionTrait,
{
    let model = Users::find_by_id(user.user_id)
        .one(db)
        .await?
        .ok_or(AppError::NotFound)?;

    let mut active: UserActive = model.into();
    if let Some(phone) = payload.phone {
        active.phone = Set(Some(phone.trim().to_string()).filter(|p| !p.is_empty()));
    }
    if let Some(address) = payload.address {
        active.address = Set(Some(address.trim().to_string()).filter(|a| !a.is_empty()));
    }
    let model = active.update(db).await?;

    log_user_action_lossy(db, user, UserAction::UpdateProfile, None, None).await;

    Ok(ApiResponse::ok("Profile updated", User::from(model)))
}

pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))?
        .to_string())
}

pub fn issue_token(jwt: &JwtSettings, user: &AuthUser) -> AppResult<String> {
    let expiration = Utc::now()
        .checked_add_signed(Duration::hours(jwt.ttl_hours))
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to set expiration")))?;

    let claims = Claims {
        sub: user.user_id.to_string(),
        role: user.role().to_string(),
        exp: expiration.timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(jwt.secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))
}
