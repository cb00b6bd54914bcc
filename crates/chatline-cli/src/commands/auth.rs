//! Account handlers: register, login, logout, whoami

use std::io::{self, Write};

use anyhow::{bail, Context, Result};

use chatline_core::{ApiClient, ApiError, Config, Registration, Session};

use crate::output::Output;

/// Exchange credentials for a token and store the session
pub async fn login(
    config: &Config,
    email: String,
    password: Option<String>,
    output: &Output,
) -> Result<()> {
    let password = match password {
        Some(password) => password,
        None => prompt_password()?,
    };
    if password.is_empty() {
        bail!("Password must not be empty");
    }

    let client = ApiClient::new(config, None)?;
    let response = match client.login(&email, &password).await {
        Ok(response) => response,
        Err(e) if e.is_unauthorized() || matches!(e, ApiError::Status { status: 400, .. }) => {
            bail!("Login failed: invalid email or password");
        }
        Err(e) => return Err(e).context("Login failed"),
    };

    // Older servers omit the user from the login response
    let user = match response.user {
        Some(user) => user,
        None => ApiClient::new(config, Some(response.token.clone()))?
            .current_user()
            .await
            .context("Signed in, but failed to load the current user")?,
    };

    let session = Session::new(response.token, user);
    session.save(&config.session_path())?;

    if output.is_json() {
        println!(
            "{}",
            serde_json::json!({
                "status": "success",
                "user": session.user()
            })
        );
    } else {
        output.success(&format!("Signed in as {}", session.display_name()));
    }

    Ok(())
}

/// Create an account, then sign in with it
pub async fn register(
    config: &Config,
    email: String,
    first_name: String,
    last_name: String,
    password: Option<String>,
    output: &Output,
) -> Result<()> {
    let password = match password {
        Some(password) => password,
        None => prompt_password()?,
    };
    let registration = new_registration(email, first_name, last_name, password)?;

    let client = ApiClient::new(config, None)?;
    let user = match client.register(&registration).await {
        Ok(user) => user,
        Err(ApiError::Status { status: 400, .. }) => {
            bail!("Registration failed: the server rejected these details (is the email taken?)");
        }
        Err(e) => return Err(e).context("Registration failed"),
    };
    output.success(&format!("Registered {}", user.display_name()));

    login(
        config,
        registration.email,
        Some(registration.password),
        output,
    )
    .await
}

fn new_registration(
    email: String,
    first_name: String,
    last_name: String,
    password: String,
) -> Result<Registration> {
    let email = email.trim().to_string();
    if !email.contains('@') {
        bail!("'{}' is not an email address", email);
    }
    if password.is_empty() {
        bail!("Password must not be empty");
    }
    Ok(Registration {
        email,
        password,
        first_name: first_name.trim().to_string(),
        last_name: last_name.trim().to_string(),
    })
}

/// Remove the stored session
pub fn logout(config: &Config, output: &Output) -> Result<()> {
    Session::logout(&config.session_path())?;
    output.success("Signed out");
    Ok(())
}

/// Show the signed-in user
pub fn whoami(session: &Session, output: &Output) -> Result<()> {
    match session.user() {
        Some(user) => {
            output.print_user(user);
            Ok(())
        }
        None => bail!("Not signed in. Run `chatline login <email>` first."),
    }
}

fn prompt_password() -> Result<String> {
    print!("Password: ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim_end_matches(['\r', '\n']).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_registration() {
        let registration = new_registration(
            " ada@example.com ".to_string(),
            "Ada ".to_string(),
            String::new(),
            "secret".to_string(),
        )
        .unwrap();
        assert_eq!(registration.email, "ada@example.com");
        assert_eq!(registration.first_name, "Ada");
        assert!(registration.last_name.is_empty());
    }

    #[test]
    fn test_new_registration_rejects_bad_input() {
        let err = new_registration(
            "ada".to_string(),
            String::new(),
            String::new(),
            "secret".to_string(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("not an email"));

        assert!(new_registration(
            "ada@example.com".to_string(),
            String::new(),
            String::new(),
            String::new(),
        )
        .is_err());
    }
}
