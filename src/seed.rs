use std::sync::Arc;

use tracing::{error, info};

use crate::{
    db::{ConnectionManager, DbHandle},
    error::AppError,
    users::{NewUser, UserDirectory, UserRole, UserStore},
};

/// An account the seed guarantees to exist.
#[derive(Debug, Clone, Copy)]
pub struct SeedAccount {
    pub label: &'static str,
    pub email: &'static str,
    pub password: &'static str,
    pub first_name: &'static str,
    pub last_name: &'static str,
    pub role: UserRole,
}

pub const SEED_ACCOUNTS: [SeedAccount; 2] = [
    SeedAccount {
        label: "admin user",
        email: "admin@oalearn.com",
        password: "Admin@123",
        first_name: "Admin",
        last_name: "User",
        role: UserRole::Admin,
    },
    SeedAccount {
        label: "test student",
        email: "student@oalearn.com",
        password: "Student@123",
        first_name: "Test",
        last_name: "Student",
        role: UserRole::Student,
    },
];

#[derive(Debug, Default)]
pub struct SeedReport {
    pub created: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl SeedReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

enum Outcome {
    Created,
    Skipped,
}

async fn seed_account(dir: &UserDirectory, account: &SeedAccount) -> Result<Outcome, AppError> {
    if dir.find_by_email(account.email).await?.is_some() {
        info!(email = account.email, "{} already exists, skipping", account.label);
        return Ok(Outcome::Skipped);
    }

    dir.insert(NewUser {
        email: account.email.into(),
        password: account.password.into(),
        first_name: account.first_name.into(),
        last_name: account.last_name.into(),
        role: Some(account.role),
        is_active: None,
    })
    .await?;
    info!(email = account.email, "{} created successfully", account.label);
    Ok(Outcome::Created)
}

/// Tries every account independently; one failure never stops the others.
pub async fn seed_accounts(dir: &UserDirectory, accounts: &[SeedAccount]) -> SeedReport {
    let mut report = SeedReport::default();
    for account in accounts {
        match seed_account(dir, account).await {
            Ok(Outcome::Created) => report.created.push(account.email.to_string()),
            Ok(Outcome::Skipped) => report.skipped.push(account.email.to_string()),
            Err(e) => {
                error!(email = account.email, error = %e, "error seeding {}", account.label);
                report.failed.push((account.email.to_string(), e.to_string()));
            }
        }
    }
    report
}

/// Connects, seeds [`SEED_ACCOUNTS`] through a store bound to the handle and
/// disconnects afterwards regardless of how seeding went.
pub async fn run_seed<F>(manager: &ConnectionManager, open_store: F) -> Result<SeedReport, AppError>
where
    F: FnOnce(&DbHandle) -> Arc<dyn UserStore>,
{
    info!("connecting to database");
    let handle = manager.connect().await?;

    info!("seeding database");
    let directory = UserDirectory::new(open_store(&handle));
    let report = seed_accounts(&directory, &SEED_ACCOUNTS).await;
    drop(directory);

    manager.disconnect().await;

    if report.is_success() {
        info!(
            created = report.created.len(),
            skipped = report.skipped.len(),
            "database seeding completed successfully"
        );
    } else {
        error!(failed = report.failed.len(), "database seeding finished with errors");
    }
    Ok(report)
}
