use chrono::Utc;
use thiserror::Error;

use crate::{
    auth::hash_password,
    config::AdminSeed,
    models::{NewProcedure, NewUser, Role},
    store::{Store, StoreError},
};

#[derive(Debug, Error)]
pub enum SeedError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("password hash failed: {0}")]
    Hash(String),
}

/// (name, description, minutes, price in cents)
const DEFAULT_CATALOG: [(&str, &str, i64, i64); 4] = [
    ("Botox", "Botulinum toxin application for expression lines", 60, 80_000),
    ("Lip Filler", "Hyaluronic acid lip volume and contour", 45, 120_000),
    ("Skin Cleansing", "Deep facial cleansing with extraction", 90, 35_000),
    ("Microneedling", "Collagen induction therapy", 75, 45_000),
];

pub async fn seed_defaults(store: &dyn Store, admin: &AdminSeed, catalog: bool) -> Result<(), SeedError> {
    seed_admin(store, admin).await?;
    if catalog {
        seed_catalog(store).await?;
    }
    Ok(())
}

async fn seed_admin(store: &dyn Store, admin: &AdminSeed) -> Result<(), SeedError> {
    let users = store.list_users().await?;
    if users.iter().any(|user| user.role == Role::Admin) {
        return Ok(());
    }

    if admin.uses_default_password() {
        log::warn!("ADMIN_PASSWORD not set. Using default password 'admin'. Set ADMIN_PASSWORD in production.");
    }

    let password_hash = hash_password(&admin.password).map_err(|err| SeedError::Hash(err.to_string()))?;
    store
        .insert_user(
            NewUser {
                username: admin.username.clone(),
                name: admin.display_name.clone(),
                role: Role::Admin,
                password_hash,
            },
            Utc::now(),
        )
        .await?;
    log::info!("Seeded admin user {}", admin.username);
    Ok(())
}

async fn seed_catalog(store: &dyn Store) -> Result<(), SeedError> {
    if !store.list_procedures().await?.is_empty() {
        return Ok(());
    }
    for (name, description, duration, price) in DEFAULT_CATALOG {
        store
            .insert_procedure(
                NewProcedure {
                    name: name.to_string(),
                    description: description.to_string(),
                    duration,
                    price,
                },
                Utc::now(),
            )
            .await?;
    }
    log::info!("Seeded {} catalog procedures", DEFAULT_CATALOG.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{auth::authenticate_credentials, store::memory::MemoryStore};

    fn admin() -> AdminSeed {
        AdminSeed {
            username: "owner".into(),
            password: "open-sesame".into(),
            display_name: "Clinic Owner".into(),
        }
    }

    #[actix_web::test]
    async fn seeding_is_idempotent() {
        let store = MemoryStore::new();
        seed_defaults(&store, &admin(), true).await.unwrap();
        seed_defaults(&store, &admin(), true).await.unwrap();

        assert_eq!(store.list_users().await.unwrap().len(), 1);
        let procedures = store.list_procedures().await.unwrap();
        assert_eq!(procedures.len(), 4);
        let botox = procedures.iter().find(|p| p.name == "Botox").unwrap();
        assert_eq!((botox.duration, botox.price), (60, 80_000));

        let user = authenticate_credentials(&store, "owner", "open-sesame")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.role, Role::Admin);
        assert!(authenticate_credentials(&store, "owner", "wrong")
            .await
            .unwrap()
            .is_none());
    }

    #[actix_web::test]
    async fn catalog_can_be_skipped() {
        let store = MemoryStore::new();
        seed_defaults(&store, &admin(), false).await.unwrap();
        assert!(store.list_procedures().await.unwrap().is_empty());
    }
}
