use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::users::{
    dto::{CandidateUser, ListQuery, UserPatch},
    error::{UserError, UserResult},
    password::SecretError,
    repo::UserStore,
    repo_types::{StoredUser, UserFilter, UserSort},
    validation::{apply_update, validate, ValidationErrors},
};

const MAX_PAGE_SIZE: i64 = 100;

/// Runs password hashing on the blocking pool so request tasks keep getting polled.
async fn hash_off_runtime<T, F>(work: F) -> UserResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, SecretError> + Send + 'static,
{
    let hashed = tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| SecretError::Hash(format!("hashing task failed: {e}")))?;
    Ok(hashed?)
}

/// Fails with [`UserError::Conflict`] when a user other than `exclude` already holds `email`.
///
/// This is a fast path only. Two requests can both pass it; the store's unique
/// constraint decides between them.
pub async fn enforce_uniqueness(
    store: &dyn UserStore,
    email: &str,
    exclude: Option<Uuid>,
) -> UserResult<()> {
    match store.find_by_email(email).await? {
        Some(holder) if Some(holder.id) != exclude => {
            warn!(%email, "email already registered");
            Err(UserError::Conflict(email.to_string()))
        }
        _ => Ok(()),
    }
}

#[instrument(skip_all)]
pub async fn create_user(store: &dyn UserStore, candidate: &CandidateUser) -> UserResult<StoredUser> {
    let validated = validate(candidate)?;
    enforce_uniqueness(store, &validated.email, None).await?;

    let new_user = hash_off_runtime(move || validated.into_new_user()).await?;
    let user = store.insert(new_user).await?;
    info!(user_id = %user.id, role = %user.role, "user created");
    Ok(user)
}

#[instrument(skip(store))]
pub async fn get_user(store: &dyn UserStore, id: Uuid) -> UserResult<StoredUser> {
    store.find_by_id(id).await?.ok_or(UserError::NotFound(id))
}

#[instrument(skip(store))]
pub async fn list_users(store: &dyn UserStore, query: ListQuery) -> UserResult<Vec<StoredUser>> {
    let sort = match query.sort.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        None => UserSort::default(),
        Some(raw) => raw
            .parse()
            .map_err(|message| ValidationErrors::single("sort", message))?,
    };
    let filter = UserFilter {
        sort,
        email: query
            .email
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty()),
        limit: query.limit.clamp(1, MAX_PAGE_SIZE),
        offset: query.offset.max(0),
    };
    Ok(store.list(&filter).await?)
}

#[instrument(skip(store, patch))]
pub async fn update_user(store: &dyn UserStore, id: Uuid, patch: &UserPatch) -> UserResult<StoredUser> {
    let existing = get_user(store, id).await?;
    let update = apply_update(&existing, patch)?;

    if update.record().email != existing.email {
        enforce_uniqueness(store, &update.record().email, Some(id)).await?;
    }

    let record = hash_off_runtime(move || update.into_record()).await?;
    let user = store
        .update_by_id(id, &record)
        .await?
        .ok_or(UserError::NotFound(id))?;
    info!(user_id = %user.id, "user updated");
    Ok(user)
}

#[instrument(skip(store))]
pub async fn delete_user(store: &dyn UserStore, id: Uuid) -> UserResult<StoredUser> {
    let user = store
        .delete_by_id(id)
        .await?
        .ok_or(UserError::NotFound(id))?;
    info!(user_id = %user.id, "user deleted");
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::{
        password::verify_secret,
        repo::{InMemoryUserStore, StoreError},
        repo_types::{NewUser, Role},
    };
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };
    use time::OffsetDateTime;

    /// Passes every lookup but loses every write to a concurrent holder of the same email.
    struct RaceLosingStore {
        existing: StoredUser,
    }

    impl RaceLosingStore {
        fn new() -> Self {
            let existing = StoredUser::from_new(
                Uuid::new_v4(),
                NewUser {
                    first_name: "Bob".into(),
                    last_name: "Jones".into(),
                    age: 45,
                    email: "bob@example.com".into(),
                    password_hash: "$argon2id$placeholder".into(),
                    role: Role::User,
                    address: None,
                },
                OffsetDateTime::now_utc(),
            );
            Self { existing }
        }
    }

    #[async_trait]
    impl UserStore for RaceLosingStore {
        async fn find_by_email(&self, _email: &str) -> Result<Option<StoredUser>, StoreError> {
            Ok(None)
        }

        async fn insert(&self, user: NewUser) -> Result<StoredUser, StoreError> {
            Err(StoreError::Conflict(user.email))
        }

        async fn find_by_id(&self, id: Uuid) -> Result<Option<StoredUser>, StoreError> {
            Ok(Some(self.existing.clone()).filter(|u| u.id == id))
        }

        async fn update_by_id(&self, _id: Uuid, user: &StoredUser) -> Result<Option<StoredUser>, StoreError> {
            Err(StoreError::Conflict(user.email.clone()))
        }

        async fn delete_by_id(&self, _id: Uuid) -> Result<Option<StoredUser>, StoreError> {
            Ok(None)
        }

        async fn list(&self, _filter: &UserFilter) -> Result<Vec<StoredUser>, StoreError> {
            Ok(Vec::new())
        }
    }

    fn candidate(value: Value) -> CandidateUser {
        serde_json::from_value(value).expect("candidate json")
    }

    fn alice() -> CandidateUser {
        candidate(json!({
            "firstName": "Alice",
            "lastName": "Smith",
            "age": 30,
            "email": "Alice@Example.com",
            "password": "secret123"
        }))
    }

    fn bob() -> CandidateUser {
        candidate(json!({
            "firstName": "Bob",
            "lastName": "Jones",
            "age": 45,
            "email": "bob@example.com",
            "password": "hunter22",
            "role": "admin"
        }))
    }

    #[tokio::test]
    async fn created_user_round_trips_with_hashed_password() {
        let store = InMemoryUserStore::new();
        let created = create_user(&store, &alice()).await.unwrap();

        let fetched = get_user(&store, created.id).await.unwrap();
        assert_eq!(fetched, created);
        assert_eq!(fetched.email, "alice@example.com");
        assert_eq!(fetched.role, Role::User);
        assert_ne!(fetched.password_hash, "secret123");
        assert!(verify_secret("secret123", &fetched.password_hash).unwrap());
    }

    #[tokio::test]
    async fn invalid_candidate_is_never_persisted() {
        let store = InMemoryUserStore::new();
        let err = create_user(&store, &candidate(json!({ "firstName": "Al" })))
            .await
            .unwrap_err();

        assert!(matches!(err, UserError::Validation(ref e) if e.has("firstName")));
        assert!(list_users(&store, ListQuery::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_email_is_a_conflict() {
        let store = InMemoryUserStore::new();
        create_user(&store, &alice()).await.unwrap();

        let mut again = alice();
        again.email = Some(json!("  ALICE@example.COM "));
        let err = create_user(&store, &again).await.unwrap_err();
        assert!(matches!(err, UserError::Conflict(email) if email == "alice@example.com"));
    }

    #[tokio::test]
    async fn concurrent_creates_with_same_email_admit_exactly_one() {
        let store = InMemoryUserStore::new();
        let first = alice();
        let second = alice();

        let (a, b) = tokio::join!(create_user(&store, &first), create_user(&store, &second));
        let outcomes = [a, b];

        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .any(|r| matches!(r, Err(UserError::Conflict(_)))));
        assert_eq!(list_users(&store, ListQuery::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn enforce_uniqueness_ignores_the_excluded_record() {
        let store = InMemoryUserStore::new();
        let created = create_user(&store, &alice()).await.unwrap();

        assert!(enforce_uniqueness(&store, "alice@example.com", Some(created.id)).await.is_ok());
        assert!(matches!(
            enforce_uniqueness(&store, "alice@example.com", None).await,
            Err(UserError::Conflict(_))
        ));
        assert!(enforce_uniqueness(&store, "nobody@example.com", None).await.is_ok());
    }

    #[tokio::test]
    async fn update_revalidates_and_rehashes() {
        let store = InMemoryUserStore::new();
        let created = create_user(&store, &alice()).await.unwrap();

        let err = update_user(&store, created.id, &candidate(json!({ "age": 17 })))
            .await
            .unwrap_err();
        assert!(matches!(err, UserError::Validation(ref e) if e.has("age")));

        let updated = update_user(
            &store,
            created.id,
            &candidate(json!({ "age": 31, "password": "new-secret" })),
        )
        .await
        .unwrap();
        assert_eq!(updated.age, 31);
        assert_eq!(updated.first_name, "Alice");
        assert_eq!(updated.created_at, created.created_at);
        assert!(verify_secret("new-secret", &updated.password_hash).unwrap());
        assert!(!verify_secret("secret123", &updated.password_hash).unwrap());
    }

    #[tokio::test]
    async fn empty_update_keeps_record() {
        let store = InMemoryUserStore::new();
        let created = create_user(&store, &alice()).await.unwrap();

        let updated = update_user(&store, created.id, &UserPatch::default()).await.unwrap();
        assert_eq!(updated.first_name, created.first_name);
        assert_eq!(updated.email, created.email);
        assert_eq!(updated.password_hash, created.password_hash);
    }

    #[tokio::test]
    async fn update_to_taken_email_is_a_conflict() {
        let store = InMemoryUserStore::new();
        create_user(&store, &alice()).await.unwrap();
        let bob = create_user(&store, &bob()).await.unwrap();

        let err = update_user(&store, bob.id, &candidate(json!({ "email": "alice@example.com" })))
            .await
            .unwrap_err();
        assert!(matches!(err, UserError::Conflict(_)));

        // Re-submitting one's own email is fine.
        let same = update_user(&store, bob.id, &candidate(json!({ "email": "BOB@example.com" })))
            .await
            .unwrap();
        assert_eq!(same.email, "bob@example.com");
    }

    #[tokio::test]
    async fn missing_user_is_not_found() {
        let store = InMemoryUserStore::new();
        let id = Uuid::new_v4();

        assert!(matches!(get_user(&store, id).await, Err(UserError::NotFound(x)) if x == id));
        assert!(matches!(
            update_user(&store, id, &UserPatch::default()).await,
            Err(UserError::NotFound(_))
        ));
        assert!(matches!(delete_user(&store, id).await, Err(UserError::NotFound(_))));
    }

    #[tokio::test]
    async fn delete_removes_user() {
        let store = InMemoryUserStore::new();
        let created = create_user(&store, &alice()).await.unwrap();

        let deleted = delete_user(&store, created.id).await.unwrap();
        assert_eq!(deleted.id, created.id);
        assert!(matches!(get_user(&store, created.id).await, Err(UserError::NotFound(_))));
    }

    #[tokio::test]
    async fn list_normalizes_filter_and_clamps_page() {
        let store = InMemoryUserStore::new();
        create_user(&store, &alice()).await.unwrap();
        create_user(&store, &bob()).await.unwrap();

        let found = list_users(
            &store,
            ListQuery {
                email: Some(" ALICE@example.com ".into()),
                ..ListQuery::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(found.len(), 1);

        let clamped = list_users(
            &store,
            ListQuery {
                limit: 0,
                offset: -5,
                ..ListQuery::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(clamped.len(), 1);
    }

    #[tokio::test]
    async fn store_conflict_on_insert_is_a_conflict() {
        let store = RaceLosingStore::new();
        let err = create_user(&store, &alice()).await.unwrap_err();
        assert!(matches!(err, UserError::Conflict(email) if email == "alice@example.com"));
    }

    #[tokio::test]
    async fn store_conflict_on_update_is_a_conflict() {
        let store = RaceLosingStore::new();
        let id = store.existing.id;
        let err = update_user(&store, id, &candidate(json!({ "email": "carol@example.com" })))
            .await
            .unwrap_err();
        assert!(matches!(err, UserError::Conflict(email) if email == "carol@example.com"));
    }

    #[tokio::test]
    async fn list_sorts_by_requested_key() {
        let store = InMemoryUserStore::new();
        create_user(&store, &bob()).await.unwrap();
        create_user(&store, &alice()).await.unwrap();

        let listed = |sort: Option<&str>| {
            list_users(
                &store,
                ListQuery {
                    sort: sort.map(String::from),
                    ..ListQuery::default()
                },
            )
        };
        let emails = |users: Vec<StoredUser>| users.into_iter().map(|u| u.email).collect::<Vec<_>>();

        assert_eq!(
            emails(listed(Some("email")).await.unwrap()),
            ["alice@example.com", "bob@example.com"]
        );
        assert_eq!(
            emails(listed(Some("-email")).await.unwrap()),
            ["bob@example.com", "alice@example.com"]
        );
        assert_eq!(listed(Some(" ")).await.unwrap().len(), 2);

        let err = listed(Some("password")).await.unwrap_err();
        assert!(matches!(err, UserError::Validation(ref e) if e.has("sort")));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn hashing_does_not_stall_other_tasks() {
        let store = InMemoryUserStore::new();
        let ticks = Arc::new(AtomicUsize::new(0));
        let ticker = tokio::spawn({
            let ticks = ticks.clone();
            async move {
                loop {
                    ticks.fetch_add(1, Ordering::Relaxed);
                    tokio::task::yield_now().await;
                }
            }
        });

        let before = ticks.load(Ordering::Relaxed);
        create_user(&store, &alice()).await.unwrap();
        let during = ticks.load(Ordering::Relaxed) - before;
        ticker.abort();

        assert!(during > 10, "other tasks ran only {during} times while hashing");
    }
}
