mod common;

use std::sync::Arc;

use async_trait::async_trait;
use doc_identity::prelude::*;
use doc_identity::user_account::IdentityUserClaim;
use doc_identity::validation::UserValidator;

use common::{managers, test_role, test_user, unique, TestHasher};

#[tokio::test]
async fn created_user_is_found_by_name() {
    let (users, _roles) = managers().await;
    let name = unique("alice");
    let mut user = test_user(&name);

    users.create(&mut user).await.unwrap();

    let found = users.find_by_name(&name).await.unwrap().unwrap();
    assert_eq!(found.id, user.id);
    assert_eq!(found.normalized_user_name, name.to_uppercase());
}

#[tokio::test]
async fn duplicate_user_name_is_rejected() {
    let (users, _roles) = managers().await;
    let name = unique("bob");

    users.create(&mut test_user(&name)).await.unwrap();
    let err = users.create(&mut test_user(&name)).await.unwrap_err();

    assert_eq!(err.code(), "DuplicateUserName");
}

#[tokio::test]
async fn names_differing_only_in_case_collide() {
    let (users, _roles) = managers().await;
    let name = unique("carol");

    users.create(&mut test_user(&name)).await.unwrap();
    let err = users
        .create(&mut test_user(&name.to_uppercase()))
        .await
        .unwrap_err();

    assert_eq!(err.code(), "DuplicateUserName");
}

#[tokio::test]
async fn find_by_email_uses_normalized_form() {
    let (users, _roles) = managers().await;
    let name = unique("dave");
    let email = format!("{name}@example.com");
    let mut user = test_user(&name).with_email(&email);

    users.create(&mut user).await.unwrap();

    let found = users
        .find_by_email(&email.to_uppercase())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, user.id);
}

#[tokio::test]
async fn valid_email_shapes_pass_and_invalid_fail() {
    let (users, _roles) = managers().await;

    let mut ok = test_user(&unique("erin")).with_email("test_email@foo.com");
    users.create(&mut ok).await.unwrap();

    let mut bad = test_user(&unique("frank")).with_email("not-an-email");
    let err = users.create(&mut bad).await.unwrap_err();
    assert_eq!(err.code(), "InvalidEmail");
}

#[tokio::test]
async fn disallowed_user_name_characters_can_be_lifted() {
    let (users, _roles) = managers().await;
    let err = users.create(&mut test_user("!noway")).await.unwrap_err();
    assert_eq!(err.code(), "InvalidUserName");

    let mut options = IdentityOptions::default();
    options.user.allowed_user_name_characters = None;
    let (users, _roles) = managers().await;
    let users = users.with_options(options);
    users.create(&mut test_user("!noway")).await.unwrap();
}

#[tokio::test]
async fn unique_email_policy_rejects_reuse() {
    let mut options = IdentityOptions::default();
    options.user.require_unique_email = true;
    let (users, _roles) = managers().await;
    let users = users.with_options(options);

    let email = format!("{}@example.com", unique("shared"));
    users
        .create(&mut test_user(&unique("gina")).with_email(&email))
        .await
        .unwrap();
    let err = users
        .create(&mut test_user(&unique("hank")).with_email(&email))
        .await
        .unwrap_err();

    assert_eq!(err.code(), "DuplicateEmail");
}

#[tokio::test]
async fn claims_round_trip_and_stay_isolated_per_user() {
    let (users, _roles) = managers().await;
    let mut first = test_user(&unique("ivy"));
    let mut second = test_user(&unique("jack"));
    users.create(&mut first).await.unwrap();
    users.create(&mut second).await.unwrap();

    users
        .add_claims(
            &mut first,
            &[
                Claim::with_issuer("team", "ops", "corp"),
                Claim::new("shift", "night"),
            ],
        )
        .await
        .unwrap();
    users
        .add_claim(&mut second, &Claim::new("team", "ops"))
        .await
        .unwrap();

    let first_claims = users.get_claims(&first).await.unwrap();
    assert_eq!(first_claims.len(), 2);
    assert_eq!(first_claims[0].issuer.as_deref(), Some("corp"));
    assert_eq!(users.get_claims(&second).await.unwrap().len(), 1);

    users
        .remove_claims(&mut first, &[Claim::new("shift", "night")])
        .await
        .unwrap();
    assert_eq!(users.get_claims(&first).await.unwrap().len(), 1);
    assert_eq!(users.get_claims(&second).await.unwrap().len(), 1);
}

#[tokio::test]
async fn replace_claim_rewrites_every_match() {
    let (users, _roles) = managers().await;
    let mut user = test_user(&unique("kate"));
    users.create(&mut user).await.unwrap();

    users
        .add_claims(
            &mut user,
            &[
                Claim::with_issuer("grade", "a", "school"),
                Claim::new("grade", "a"),
                Claim::new("grade", "b"),
            ],
        )
        .await
        .unwrap();

    users
        .replace_claim(&mut user, &Claim::new("grade", "a"), &Claim::new("grade", "c"))
        .await
        .unwrap();

    let claims = users.get_claims(&user).await.unwrap();
    let c_count = claims.iter().filter(|c| c.claim_value == "c").count();
    assert_eq!(c_count, 2);
    // the stored issuer survives a replacement that does not supply one
    assert!(claims
        .iter()
        .any(|c| c.claim_value == "c" && c.issuer.as_deref() == Some("school")));
    assert!(claims.iter().any(|c| c.claim_value == "b"));
}

#[tokio::test]
async fn removal_with_issuer_only_removes_that_issuer() {
    let (users, _roles) = managers().await;
    let mut user = test_user(&unique("liam"));
    users.create(&mut user).await.unwrap();

    users
        .add_claims(
            &mut user,
            &[
                Claim::with_issuer("badge", "blue", "east"),
                Claim::with_issuer("badge", "blue", "west"),
            ],
        )
        .await
        .unwrap();

    users
        .remove_claims(&mut user, &[Claim::with_issuer("badge", "blue", "east")])
        .await
        .unwrap();

    let claims = users.get_claims(&user).await.unwrap();
    assert_eq!(claims.len(), 1);
    assert_eq!(claims[0].issuer.as_deref(), Some("west"));
}

#[tokio::test]
async fn role_membership_round_trips() {
    let (users, roles) = managers().await;
    let role_name = unique("auditors");
    roles.create(&mut test_role(&role_name)).await.unwrap();

    let mut user = test_user(&unique("mona"));
    users.create(&mut user).await.unwrap();

    users.add_to_role(&mut user, &role_name).await.unwrap();
    assert!(users.is_in_role(&user, &role_name).await.unwrap());
    assert_eq!(
        users.get_roles(&user).await.unwrap(),
        vec![role_name.to_uppercase()]
    );

    users.remove_from_role(&mut user, &role_name).await.unwrap();
    assert!(!users.is_in_role(&user, &role_name).await.unwrap());
}

#[tokio::test]
async fn adding_to_a_missing_role_fails() {
    let (users, _roles) = managers().await;
    let mut user = test_user(&unique("nate"));
    users.create(&mut user).await.unwrap();

    let err = users
        .add_to_role(&mut user, &unique("ghost-role"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "RoleNotFound");
}

#[tokio::test]
async fn duplicate_membership_add_fails() {
    let (users, roles) = managers().await;
    let role_name = unique("editors");
    roles.create(&mut test_role(&role_name)).await.unwrap();

    let mut user = test_user(&unique("omar"));
    users.create(&mut user).await.unwrap();
    users.add_to_role(&mut user, &role_name).await.unwrap();

    let err = users.add_to_role(&mut user, &role_name).await.unwrap_err();
    assert_eq!(err.code(), "UserAlreadyInRole");
}

#[tokio::test]
async fn removing_a_membership_not_held_fails() {
    let (users, roles) = managers().await;
    let role_name = unique("writers");
    roles.create(&mut test_role(&role_name)).await.unwrap();

    let mut user = test_user(&unique("pam"));
    users.create(&mut user).await.unwrap();

    let err = users
        .remove_from_role(&mut user, &role_name)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "UserNotInRole");
}

#[tokio::test]
async fn batch_add_collapses_duplicate_names_within_the_call() {
    let (users, roles) = managers().await;
    let role_name = unique("reviewers");
    roles.create(&mut test_role(&role_name)).await.unwrap();

    let mut user = test_user(&unique("quinn"));
    users.create(&mut user).await.unwrap();

    users
        .add_to_roles(&mut user, &[&role_name, &role_name, &role_name.to_uppercase()])
        .await
        .unwrap();

    assert_eq!(users.get_roles(&user).await.unwrap().len(), 1);
}

#[tokio::test]
async fn users_in_role_reflects_membership_changes() {
    let (users, roles) = managers().await;
    let role_name = unique("staff");
    roles.create(&mut test_role(&role_name)).await.unwrap();

    let mut members = Vec::new();
    for i in 0..4 {
        let mut user = test_user(&unique(&format!("member{i}")));
        users.create(&mut user).await.unwrap();
        users.add_to_role(&mut user, &role_name).await.unwrap();
        members.push(user);
    }

    assert_eq!(users.get_users_in_role(&role_name).await.unwrap().len(), 4);

    users
        .remove_from_role(&mut members[0], &role_name)
        .await
        .unwrap();
    assert_eq!(users.get_users_in_role(&role_name).await.unwrap().len(), 3);
}

#[tokio::test]
async fn deleting_a_user_cascades_over_embedded_records() {
    let (users, roles) = managers().await;
    let role_name = unique("ops");
    roles.create(&mut test_role(&role_name)).await.unwrap();

    let mut user = test_user(&unique("rita"));
    users.create(&mut user).await.unwrap();
    users
        .add_claim(&mut user, &Claim::new("c", "v"))
        .await
        .unwrap();
    users
        .add_login(&mut user, &UserLoginInfo::new("github", unique("key")))
        .await
        .unwrap();
    users
        .set_token(&mut user, "github", "refresh", "tok")
        .await
        .unwrap();
    users.add_to_role(&mut user, &role_name).await.unwrap();

    users.delete(&user).await.unwrap();

    assert!(users.find_by_id(&user.id).await.unwrap().is_none());
    assert!(users.get_claims(&user).await.unwrap().is_empty());
    assert!(users.get_logins(&user).await.unwrap().is_empty());
    assert!(users.get_roles(&user).await.unwrap().is_empty());
    assert!(users.get_users_in_role(&role_name).await.unwrap().is_empty());
}

#[tokio::test]
async fn login_pair_maps_to_at_most_one_user() {
    let (users, _roles) = managers().await;
    let mut first = test_user(&unique("sam"));
    let mut second = test_user(&unique("tess"));
    users.create(&mut first).await.unwrap();
    users.create(&mut second).await.unwrap();

    let login = UserLoginInfo::new("github", unique("key"));
    users.add_login(&mut first, &login).await.unwrap();

    let err = users.add_login(&mut second, &login).await.unwrap_err();
    assert_eq!(err.code(), "LoginAlreadyAssociated");

    let owner = users
        .find_by_login(&login.login_provider, &login.provider_key)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(owner.id, first.id);
}

#[tokio::test]
async fn removing_a_login_rotates_the_security_stamp() {
    let (users, _roles) = managers().await;
    let mut user = test_user(&unique("uma"));
    users.create(&mut user).await.unwrap();

    let login = UserLoginInfo::new("github", unique("key"));
    users.add_login(&mut user, &login).await.unwrap();
    let stamp_before = user.security_stamp.clone();

    users
        .remove_login(&mut user, &login.login_provider, &login.provider_key)
        .await
        .unwrap();

    assert_ne!(user.security_stamp, stamp_before);
    assert!(users.get_logins(&user).await.unwrap().is_empty());

    let err = users
        .remove_login(&mut user, &login.login_provider, &login.provider_key)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "LoginNotFound");
}

#[tokio::test]
async fn tokens_upsert_by_provider_and_name() {
    let (users, _roles) = managers().await;
    let mut user = test_user(&unique("vic"));
    users.create(&mut user).await.unwrap();

    users
        .set_token(&mut user, "github", "refresh", "one")
        .await
        .unwrap();
    users
        .set_token(&mut user, "github", "refresh", "two")
        .await
        .unwrap();

    assert_eq!(
        users.get_token(&user, "github", "refresh").await.unwrap(),
        Some("two".to_string())
    );

    users
        .remove_token(&mut user, "github", "refresh")
        .await
        .unwrap();
    assert_eq!(users.get_token(&user, "github", "refresh").await.unwrap(), None);

    let err = users
        .remove_token(&mut user, "github", "refresh")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "TokenNotFound");
}

#[tokio::test]
async fn password_lifecycle_and_verification() {
    let (users, _roles) = managers().await;
    let mut user = test_user(&unique("wes"));
    users.create(&mut user).await.unwrap();
    assert!(!users.has_password(&user));

    let err = users.add_password(&mut user, "abc").await.unwrap_err();
    assert_eq!(
        err.codes(),
        vec!["PasswordTooShort", "PasswordRequiresNonAlphanumeric"]
    );

    users.add_password(&mut user, "s3cret!pw").await.unwrap();
    assert!(users.has_password(&user));
    assert!(users.check_password(&mut user, "s3cret!pw").await.unwrap());
    assert!(!users.check_password(&mut user, "wrong-pw").await.unwrap());

    let err = users.add_password(&mut user, "another!pw").await.unwrap_err();
    assert_eq!(err.code(), "UserAlreadyHasPassword");

    users.remove_password(&mut user).await.unwrap();
    assert!(!users.has_password(&user));
    assert!(!users.check_password(&mut user, "s3cret!pw").await.unwrap());
}

#[tokio::test]
async fn repeated_failures_lock_the_user_out() {
    let (users, _roles) = managers().await;
    let mut user = test_user(&unique("xena"));
    users.create(&mut user).await.unwrap();
    users.add_password(&mut user, "s3cret!pw").await.unwrap();

    let max = users.options().lockout.max_failed_access_attempts;
    for _ in 0..max {
        assert!(!users.check_password(&mut user, "wrong-pw").await.unwrap());
    }

    assert!(users.is_locked_out(&user));
    assert_eq!(user.access_failed_count, 0);
}

#[tokio::test]
async fn a_success_clears_the_failure_counter() {
    let (users, _roles) = managers().await;
    let mut user = test_user(&unique("yuri"));
    users.create(&mut user).await.unwrap();
    users.add_password(&mut user, "s3cret!pw").await.unwrap();

    assert!(!users.check_password(&mut user, "wrong-pw").await.unwrap());
    assert_eq!(user.access_failed_count, 1);

    assert!(users.check_password(&mut user, "s3cret!pw").await.unwrap());
    assert_eq!(user.access_failed_count, 0);
    assert!(!users.is_locked_out(&user));
}

#[tokio::test]
async fn concurrent_updates_from_the_same_stamp_conflict() {
    let (users, _roles) = managers().await;
    let name = unique("zane");
    let mut user = test_user(&name);
    users.create(&mut user).await.unwrap();

    let mut first = users.find_by_id(&user.id).await.unwrap().unwrap();
    let mut second = users.find_by_id(&user.id).await.unwrap().unwrap();

    first.phone_number = Some("111".into());
    users.update(&mut first).await.unwrap();

    second.phone_number = Some("222".into());
    let err = users.update(&mut second).await.unwrap_err();
    assert_eq!(err.code(), "ConcurrencyFailure");

    let stored = users.find_by_id(&user.id).await.unwrap().unwrap();
    assert_eq!(stored.phone_number.as_deref(), Some("111"));
}

struct RejectEverything(&'static str);

#[async_trait]
impl UserValidator<String> for RejectEverything {
    async fn validate(
        &self,
        _manager: &UserManager<String>,
        _user: &IdentityUser<String>,
    ) -> Result<(), Vec<IdentityError>> {
        Err(vec![IdentityError::Generic(self.0.to_string())])
    }
}

#[tokio::test]
async fn chained_validators_pool_their_failures() {
    let (users, _roles) = managers().await;
    let users = users.with_user_validators(vec![
        Arc::new(RejectEverything("first")),
        Arc::new(RejectEverything("second")),
    ]);

    let err = users.create(&mut test_user(&unique("ada"))).await.unwrap_err();
    assert_eq!(err.codes().len(), 2);
}

#[tokio::test]
async fn disposal_is_idempotent_and_blocks_operations() {
    let (users, _roles) = managers().await;
    users.dispose();
    users.dispose();
    assert!(users.is_disposed());

    let err = users.create(&mut test_user(&unique("ben"))).await.unwrap_err();
    assert_eq!(err.code(), "Disposed");
    let err = users.find_by_name("whoever").await.unwrap_err();
    assert_eq!(err.code(), "Disposed");
}

#[tokio::test]
async fn racing_login_adds_for_the_same_pair_admit_exactly_one() {
    let (users, _roles) = managers().await;
    let mut first = test_user(&unique("aldo"));
    let mut second = test_user(&unique("bria"));
    users.create(&mut first).await.unwrap();
    users.create(&mut second).await.unwrap();

    let login = UserLoginInfo::new("github", unique("key"));
    let (a, b) = tokio::join!(
        users.add_login(&mut first, &login),
        users.add_login(&mut second, &login)
    );

    assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
    let owner = users
        .find_by_login(&login.login_provider, &login.provider_key)
        .await
        .unwrap()
        .unwrap();
    assert!(owner.id == first.id || owner.id == second.id);
}

/// Sink capturing log lines for assertion.
#[derive(Clone)]
struct LogSink(Arc<std::sync::Mutex<Vec<u8>>>);

impl std::io::Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn store_failures_are_logged_with_their_codes() {
    use tracing::instrument::WithSubscriber;

    let sink = LogSink(Arc::new(std::sync::Mutex::new(Vec::new())));
    let subscriber = {
        let sink = sink.clone();
        tracing_subscriber::fmt()
            .with_writer(move || sink.clone())
            .finish()
    };

    let (users, _roles) = managers().await;
    async {
        let mut user = test_user(&unique("cass"));
        users.create(&mut user).await.unwrap();

        let mut stale = users.find_by_id(&user.id).await.unwrap().unwrap();
        user.phone_number = Some("111".into());
        users.update(&mut user).await.unwrap();

        stale.phone_number = Some("222".into());
        let err = users.update(&mut stale).await.unwrap_err();
        assert_eq!(err.code(), "ConcurrencyFailure");
    }
    .with_subscriber(subscriber)
    .await;

    let output = String::from_utf8(sink.0.lock().unwrap().clone()).unwrap();
    assert!(output.contains("ConcurrencyFailure"));
}

/// Provider double: the token is the purpose reversed.
struct ReversingProvider;

#[async_trait]
impl UserTokenProvider<String> for ReversingProvider {
    async fn generate(
        &self,
        purpose: &str,
        _user: &IdentityUser<String>,
    ) -> Result<String, IdentityError> {
        Ok(purpose.chars().rev().collect())
    }

    async fn validate(
        &self,
        purpose: &str,
        token: &str,
        _user: &IdentityUser<String>,
    ) -> Result<bool, IdentityError> {
        Ok(token == purpose.chars().rev().collect::<String>())
    }
}

#[tokio::test]
async fn purpose_bound_tokens_require_a_provider() {
    let (users, _roles) = managers().await;
    let mut user = test_user(&unique("dot"));
    users.create(&mut user).await.unwrap();

    let err = users.generate_token(&user, "reset").await.unwrap_err();
    assert_eq!(err.code(), "NotSupported");

    let users = users.with_token_provider(Arc::new(ReversingProvider));
    let token = users.generate_token(&user, "reset").await.unwrap();
    assert!(users.verify_token(&user, "reset", &token).await.unwrap());
    assert!(!users.verify_token(&user, "reset", "bogus").await.unwrap());
}

#[tokio::test]
async fn custom_factories_enrich_embedded_records() {
    let handler = common::handler().await;
    let mut factories: RecordFactories<String> = RecordFactories::default();
    factories.claim = Arc::new(|owner, claim| {
        let mut record = IdentityUserClaim::from_claim(claim);
        let _ = record.extra.insert(
            "granted_to".into(),
            serde_json::Value::String(owner.user_name.clone()),
        );
        record
    });

    let store = UserStore::new(handler).with_factories(factories);
    let users = UserManager::new(store, Arc::new(TestHasher));

    let mut user = test_user(&unique("cleo"));
    users.create(&mut user).await.unwrap();
    users
        .add_claim(&mut user, &Claim::new("team", "ops"))
        .await
        .unwrap();

    let stored = users.find_by_id(&user.id).await.unwrap().unwrap();
    assert_eq!(
        stored.claims[0].extra.get("granted_to"),
        Some(&serde_json::Value::String(user.user_name.clone()))
    );
}
