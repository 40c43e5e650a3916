//! Session commands.
//!
//! # Usage
//!
//! ```bash
//! fairway sign-in -e golfer@example.com
//! fairway whoami
//! fairway sign-out
//! ```
//!
//! The password is read from `--password` or `FAIRWAY_PASSWORD`.

use fairway_client::FairwayClient;
use fairway_client::auth::SignUpRequest;
use fairway_client::error::{Result, clear_sentry_user, set_sentry_user};
use fairway_core::Identity;

/// Sign in and print the resulting identity.
pub async fn sign_in(client: &FairwayClient, email: &str, password: &str) -> Result<()> {
    let identity = client.auth().sign_in(email, password).await?;
    set_sentry_user(&identity.id, Some(identity.email.as_str()));

    if client.auth().has_connectivity_issues() {
        tracing::warn!("Provider unreachable, signed in with a demo account");
    }
    print_identity(&identity);
    Ok(())
}

/// Register a new account.
pub async fn sign_up(client: &FairwayClient, request: &SignUpRequest) -> Result<()> {
    match client.auth().sign_up(request).await? {
        Some(identity) => {
            set_sentry_user(&identity.id, Some(identity.email.as_str()));
            print_identity(&identity);
        }
        None => tracing::info!(email = %request.email, "Check your inbox to confirm the account"),
    }
    Ok(())
}

/// Sign out. Local state is cleared even if the provider cannot be told.
pub async fn sign_out(client: &FairwayClient) -> Result<()> {
    client.auth().restore_session().await;
    let result = client.auth().sign_out().await;
    clear_sentry_user();
    result?;
    tracing::info!("Signed out");
    Ok(())
}

/// Restore the stored session and print who is signed in.
pub async fn whoami(client: &FairwayClient) {
    let snapshot = client.auth().restore_session().await;
    match &snapshot.identity {
        Some(identity) => print_identity(identity),
        None => tracing::info!(status = %snapshot.status, "Not signed in"),
    }
}

#[allow(clippy::print_stdout)]
fn print_identity(identity: &Identity) {
    println!("{} <{}>", identity.display_name(), identity.email);
    println!("  id:       {}", identity.id);
    if !identity.username.is_empty() {
        println!("  username: {}", identity.username);
    }
    if let Some(handicap) = &identity.handicap {
        println!("  handicap: {handicap}");
    }
    println!("  source:   {:?}", identity.source);
}
