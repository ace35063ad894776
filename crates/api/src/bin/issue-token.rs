//! Bearer token utility for Huddle
//!
//! Mints a JWT for local development and testing, signed with `JWT_SECRET`.
//!
//! Usage:
//!   cargo run --bin issue-token -- <org-id> <display-name> [user-id]
//!
//! The token is accepted by both the WebSocket upgrade (`/ws?token=...`) and the
//! HTTP API (`Authorization: Bearer ...`).

use std::env;

use huddle_api::{auth::JwtManager, config::MAX_JWT_EXPIRY_HOURS};
use uuid::Uuid;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let args: Vec<String> = env::args().skip(1).collect();
    if args.len() < 2 || args.len() > 3 {
        eprintln!("Usage: issue-token <org-id> <display-name> [user-id]");
        std::process::exit(1);
    }

    let org_id: Uuid = args[0]
        .parse()
        .map_err(|e| format!("Invalid org id '{}': {}", args[0], e))?;
    let display_name = args[1].trim();
    if display_name.is_empty() {
        eprintln!("Error: display name cannot be empty");
        std::process::exit(1);
    }
    let user_id = match args.get(2) {
        Some(raw) => raw
            .parse()
            .map_err(|e| format!("Invalid user id '{}': {}", raw, e))?,
        None => Uuid::new_v4(),
    };

    let secret = env::var("JWT_SECRET").map_err(|_| "JWT_SECRET must be set")?;
    if secret.len() < 32 {
        eprintln!("Warning: JWT_SECRET is shorter than 32 characters; the server will refuse it.");
    }
    let expiry_hours: i64 = env::var("JWT_EXPIRY_HOURS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(24);
    if !(1..=MAX_JWT_EXPIRY_HOURS).contains(&expiry_hours) {
        eprintln!("Error: JWT_EXPIRY_HOURS must be between 1 and {}", MAX_JWT_EXPIRY_HOURS);
        std::process::exit(1);
    }

    let jwt = JwtManager::new(&secret, expiry_hours);
    let token = jwt.generate_token(user_id.into(), org_id.into(), display_name)?;

    eprintln!("user_id: {}", user_id);
    eprintln!("org_id:  {}", org_id);
    eprintln!("expires: {} hours", expiry_hours);
    println!("{}", token);

    Ok(())
}
