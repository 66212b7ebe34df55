use log::{info, warn};
use mooring_core::{
    avatar_path, fields, Backend, DocumentPath, FieldEnum, Fields, FilterOp, Query, Record,
    SharedObserver, Subscription,
};
use validator::Validate;

use super::ClubContext;
use crate::{
    created_now, NewUser, Preferences, RequireRecord, Result, Role, UpdatedUser, UserData,
    VerificationStatus,
};

/// Which users a list subscription should include
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UserFilter {
    #[default]
    All,
    Verification(VerificationStatus),
    Role(Role),
}

/// The state of a signed in identity
#[derive(Debug, Clone, PartialEq)]
pub enum Session {
    /// The identity has a profile
    Active(UserData),
    /// Signed in, but the profile was never filled in
    NeedsOnboarding,
    /// The identity token is no longer accepted
    Expired,
}

pub struct UserService<B: ?Sized> {
    context: ClubContext<B>,
}

impl<B: Backend + ?Sized> UserService<B> {
    pub fn new(context: &ClubContext<B>) -> Self {
        Self {
            context: context.clone(),
        }
    }

    fn path(uid: &str) -> DocumentPath {
        DocumentPath::new(UserData::COLLECTION, uid)
    }

    pub async fn user(&self, uid: &str) -> Result<UserData> {
        self.context
            .find(uid)
            .await?
            .or_not_found(UserData::COLLECTION, uid)
    }

    /// Creates the profile of a freshly signed up identity. Every new member starts
    /// out as an unverified user.
    pub async fn complete_onboarding(&self, uid: &str, new_user: NewUser) -> Result<()> {
        new_user.validate()?;

        let defaults = Preferences::default();
        let mut fields = fields! {
            "phoneNumber" => new_user.phone,
            "name" => new_user.name,
            "surname" => new_user.surname,
            "pseudonym" => new_user.pseudonym,
            "description" => new_user.description,
            "role" => Role::User.as_str(),
            "verificationStatus" => VerificationStatus::ToVerify.as_str(),
            "notificationsEnabled" => defaults.notifications_enabled,
            "showPseudonym" => defaults.show_pseudonym,
        };
        fields.extend(created_now());

        self.context
            .backend
            .set(&Self::path(uid), fields, false)
            .await?;

        info!("User {} finished onboarding", uid);
        Ok(())
    }

    /// Writes the provided profile fields, leaving the rest untouched.
    pub async fn update_profile(&self, updated: UpdatedUser) -> Result<()> {
        let mut fields = Fields::new();

        if let Some(name) = updated.name {
            fields.insert("name".into(), name.into());
        }
        if let Some(surname) = updated.surname {
            fields.insert("surname".into(), surname.into());
        }
        if let Some(pseudonym) = updated.pseudonym {
            fields.insert("pseudonym".into(), pseudonym.into());
        }
        if let Some(description) = updated.description {
            fields.insert("description".into(), description.into());
        }
        if let Some(preferences) = updated.preferences {
            fields.insert(
                "notificationsEnabled".into(),
                preferences.notifications_enabled.into(),
            );
            fields.insert("showPseudonym".into(), preferences.show_pseudonym.into());
        }

        if fields.is_empty() {
            return Ok(());
        }

        self.context
            .backend
            .update(&Self::path(&updated.id), fields)
            .await?;

        Ok(())
    }

    pub async fn set_verification(&self, uid: &str, status: VerificationStatus) -> Result<()> {
        self.context
            .backend
            .update(
                &Self::path(uid),
                fields! { "verificationStatus" => status.as_str() },
            )
            .await?;

        info!("User {} verification is now {}", uid, status);
        Ok(())
    }

    pub async fn set_role(&self, uid: &str, role: Role) -> Result<()> {
        self.context
            .backend
            .update(&Self::path(uid), fields! { "role" => role.as_str() })
            .await?;

        info!("User {} is now {}", uid, role);
        Ok(())
    }

    /// Every member, ordered by surname then name.
    pub async fn list_users(&self) -> Result<Vec<UserData>> {
        let mut users = self.context.list(&filter_query(UserFilter::All)).await?;
        sort_users(&mut users);

        Ok(users)
    }

    pub fn subscribe_users(
        &self,
        filter: UserFilter,
        observer: SharedObserver<Vec<UserData>>,
    ) -> Subscription {
        self.context
            .watch_records(filter_query(filter), observer, sort_users)
    }

    pub fn subscribe_user(
        &self,
        uid: &str,
        observer: SharedObserver<Option<UserData>>,
    ) -> Subscription {
        self.context.watch_record(uid, observer)
    }

    /// Stores a new profile picture and points the profile at it.
    pub async fn upload_avatar(&self, uid: &str, bytes: Vec<u8>) -> Result<String> {
        let path = avatar_path(uid);

        self.context.storage.upload(&path, bytes, "image/jpeg").await?;
        let url = self.context.storage.download_url(&path).await?;

        self.context
            .backend
            .update(&Self::path(uid), fields! { "photoUrl" => url.as_str() })
            .await?;

        Ok(url)
    }

    /// Figures out where a signed in identity stands.
    pub async fn check_session(&self, uid: &str) -> Result<Session> {
        match self.context.find::<UserData>(uid).await {
            Ok(Some(user)) => Ok(Session::Active(user)),
            Ok(None) => Ok(Session::NeedsOnboarding),
            Err(e) if e.is_stale_session() => {
                warn!("Session of {} has expired", uid);
                Ok(Session::Expired)
            }
            Err(e) => Err(e),
        }
    }
}

fn filter_query(filter: UserFilter) -> Query {
    let query = Query::collection(UserData::COLLECTION);

    match filter {
        UserFilter::All => query,
        UserFilter::Verification(status) => {
            query.filter("verificationStatus", FilterOp::Equal, status.as_str())
        }
        UserFilter::Role(role) => query.filter("role", FilterOp::Equal, role.as_str()),
    }
}

fn sort_users(users: &mut [UserData]) {
    users.sort_by(|a, b| {
        a.surname
            .cmp(&b.surname)
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[cfg(test)]
mod test {
    use async_trait::async_trait;
    use mooring_core::{BackendError, Document, DocumentObserver, QueryObserver};

    use super::*;
    use crate::services::testing::{harness, recorder};
    use crate::ServiceError;

    fn ada() -> NewUser {
        NewUser {
            phone: "+48123456789".to_string(),
            name: "Ada".to_string(),
            surname: "Lovelace".to_string(),
            pseudonym: None,
            description: None,
        }
    }

    #[tokio::test]
    async fn onboarding_creates_an_unverified_member() {
        let h = harness();
        let users = UserService::new(&h.context);

        users.complete_onboarding("u1", ada()).await.unwrap();
        let user = users.user("u1").await.unwrap();

        assert_eq!(user.role, Role::User);
        assert_eq!(user.verification, VerificationStatus::ToVerify);
        assert_eq!(user.preferences, Preferences::default());
        assert!(user.created_at.is_some());
    }

    #[tokio::test]
    async fn onboarding_requires_a_name() {
        let h = harness();
        let users = UserService::new(&h.context);

        let mut nameless = ada();
        nameless.name.clear();

        assert!(matches!(
            users.complete_onboarding("u1", nameless).await,
            Err(ServiceError::Validation(_))
        ));
        assert_eq!(users.check_session("u1").await.unwrap(), Session::NeedsOnboarding);
    }

    #[tokio::test]
    async fn profile_updates_only_touch_given_fields() {
        let h = harness();
        let users = UserService::new(&h.context);
        users.complete_onboarding("u1", ada()).await.unwrap();

        users
            .update_profile(UpdatedUser {
                id: "u1".to_string(),
                pseudonym: Some("Countess".to_string()),
                preferences: Some(Preferences {
                    notifications_enabled: false,
                    show_pseudonym: true,
                }),
                ..Default::default()
            })
            .await
            .unwrap();

        let user = users.user("u1").await.unwrap();
        assert_eq!(user.name, "Ada");
        assert_eq!(user.display_name(), "Countess");
        assert!(!user.preferences.notifications_enabled);
    }

    #[tokio::test]
    async fn filtered_lists_follow_verification() {
        let h = harness();
        let users = UserService::new(&h.context);
        users.complete_onboarding("u1", ada()).await.unwrap();
        users.complete_onboarding("u2", ada()).await.unwrap();

        let (observer, seen) = recorder();
        let _subscription = users.subscribe_users(
            UserFilter::Verification(VerificationStatus::ToVerify),
            observer,
        );
        assert_eq!(seen.lock().last().unwrap().len(), 2);

        users
            .set_verification("u1", VerificationStatus::Verified)
            .await
            .unwrap();

        let remaining: Vec<_> = seen.lock().last().unwrap().iter().map(|u| u.id.clone()).collect();
        assert_eq!(remaining, vec!["u2"]);
    }

    #[tokio::test]
    async fn avatars_are_uploaded_then_linked() {
        let h = harness();
        let users = UserService::new(&h.context);
        users.complete_onboarding("u1", ada()).await.unwrap();

        let url = users.upload_avatar("u1", vec![1, 2, 3]).await.unwrap();

        assert_eq!(url, "memory://users/u1/avatar.jpg");
        assert_eq!(h.storage.object("users/u1/avatar.jpg").unwrap().0, vec![1, 2, 3]);
        assert_eq!(users.user("u1").await.unwrap().photo_url, Some(url));
    }

    /// A backend that rejects every read the way an expired token does.
    struct ExpiredBackend;

    #[async_trait]
    impl Backend for ExpiredBackend {
        async fn get(&self, _: &DocumentPath) -> mooring_core::Result<Option<Document>> {
            Err(BackendError::Unauthenticated)
        }

        async fn set(&self, _: &DocumentPath, _: Fields, _: bool) -> mooring_core::Result<()> {
            Err(BackendError::Unauthenticated)
        }

        async fn update(&self, _: &DocumentPath, _: Fields) -> mooring_core::Result<()> {
            Err(BackendError::Unauthenticated)
        }

        async fn add(&self, _: &str, _: Fields) -> mooring_core::Result<String> {
            Err(BackendError::Unauthenticated)
        }

        async fn query(&self, _: &Query) -> mooring_core::Result<Vec<Document>> {
            Err(BackendError::Unauthenticated)
        }

        fn subscribe_query(&self, _: Query, observer: QueryObserver) -> Subscription {
            observer.on_error(&BackendError::Unauthenticated);
            Subscription::detached()
        }

        fn subscribe_document(&self, _: DocumentPath, observer: DocumentObserver) -> Subscription {
            observer.on_error(&BackendError::Unauthenticated);
            Subscription::detached()
        }
    }

    #[tokio::test]
    async fn expired_tokens_end_the_session() {
        let h = harness();
        let context = ClubContext {
            backend: std::sync::Arc::new(ExpiredBackend),
            storage: h.context.storage.clone(),
            clock: h.context.clock.clone(),
        };
        let users = UserService::new(&context);

        assert_eq!(users.check_session("u1").await.unwrap(), Session::Expired);
    }
}
