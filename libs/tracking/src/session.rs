//! Driver lifecycle: link issuance, claiming, re-prompting and stopping.
//!
//! ```text
//! [unbound/active] --claim--> [bound/active]
//! [unbound/active] --stop/deactivate--> [inactive]
//! [bound/active]   --stop/deactivate--> [inactive]
//! ```
//!
//! `inactive` is terminal for a driver id. A new link mints a new id.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Rejection, TrackingResult};
use crate::model::{DriverId, Principal, SessionView};
use crate::prompt::PromptRegistry;
use crate::store::{Binding, SessionStore};

/// Text returned alongside every freshly issued link.
pub const LINK_INSTRUCTIONS: &str =
    "Send this link to your driver. They need to click it and start sharing location.";

/// Builds the deep link a driver opens to claim a session.
#[derive(Debug, Clone)]
pub struct LinkTemplate {
    bot_username: String,
}

impl LinkTemplate {
    pub fn new(bot_username: impl Into<String>) -> Self {
        Self {
            bot_username: bot_username.into(),
        }
    }

    pub fn url_for(&self, driver_id: &DriverId) -> String {
        format!("https://t.me/{}?start={}", self.bot_username, driver_id)
    }
}

/// Response to a link-generation request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedLink {
    pub driver_id: DriverId,
    pub tracking_url: String,
    pub instructions: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    Accepted {
        driver_id: DriverId,
        /// Whether this claim started a new prompt loop.
        prompting_started: bool,
    },
    Rejected(Rejection),
}

#[derive(Debug, Clone, PartialEq)]
pub enum StopOutcome {
    Stopped(DriverId),
    Rejected(Rejection),
}

/// Outcome of an explicit request to start or stop re-prompting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoPromptOutcome {
    Started,
    AlreadyRunning,
    Stopped,
    NotRunning,
    Rejected(Rejection),
}

/// Orchestrates the driver session state machine
#[derive(Clone)]
pub struct TrackingSessionManager {
    sessions: Arc<dyn SessionStore>,
    prompts: PromptRegistry,
    links: LinkTemplate,
}

impl TrackingSessionManager {
    pub fn new(sessions: Arc<dyn SessionStore>, prompts: PromptRegistry, links: LinkTemplate) -> Self {
        Self {
            sessions,
            prompts,
            links,
        }
    }

    /// Mint a fresh driver id and persist an active, unbound session for it.
    pub async fn issue_link(&self) -> TrackingResult<IssuedLink> {
        let driver_id = DriverId::generate();
        self.sessions.create_session(&driver_id).await?;

        info!("Issued tracking link for driver {}", driver_id);
        Ok(IssuedLink {
            tracking_url: self.links.url_for(&driver_id),
            driver_id,
            instructions: LINK_INSTRUCTIONS.to_string(),
        })
    }

    /// Bind `principal` to `driver_id` and start prompting it for locations.
    ///
    /// A principal displaced by this claim stops being prompted. If a
    /// concurrent claim displaces `principal` before its loop starts, the
    /// loop is stopped again before returning.
    pub async fn claim(
        &self,
        driver_id: &DriverId,
        principal: &Principal,
        display_name: Option<&str>,
    ) -> TrackingResult<ClaimOutcome> {
        let displaced = match self
            .sessions
            .bind_principal(driver_id, principal, display_name)
            .await?
        {
            Binding::Bound { displaced } => displaced,
            Binding::Refused => {
                debug!("Claim for unknown driver {} ignored", driver_id);
                return Ok(ClaimOutcome::Rejected(Rejection::Unknown));
            }
        };

        info!("Driver {} claimed by principal {}", driver_id, principal);
        if let Some(displaced) = displaced {
            self.prompts.stop_for(&displaced, driver_id).await;
        }

        let mut prompting_started = self.prompts.start(principal, driver_id).await;
        let still_bound = self
            .sessions
            .lookup_by_principal(principal)
            .await?
            .is_some_and(|session| &session.driver_id == driver_id);
        if !still_bound {
            debug!(
                "Principal {} lost driver {} to a concurrent claim",
                principal, driver_id
            );
            self.prompts.stop_for(principal, driver_id).await;
            prompting_started = false;
        }

        Ok(ClaimOutcome::Accepted {
            driver_id: driver_id.clone(),
            prompting_started,
        })
    }

    /// Deactivate the session bound to `principal` and stop its prompts.
    pub async fn stop(&self, principal: &Principal) -> TrackingResult<StopOutcome> {
        let Some(session) = self.sessions.lookup_by_principal(principal).await? else {
            self.prompts.stop(principal).await;
            return Ok(StopOutcome::Rejected(Rejection::NotTracking));
        };

        let deactivated = self.sessions.deactivate(&session.driver_id).await?;
        self.prompts.stop(principal).await;

        if !deactivated {
            return Ok(StopOutcome::Rejected(Rejection::NotTracking));
        }

        info!(
            "Driver {} stopped by principal {}",
            session.driver_id, principal
        );
        Ok(StopOutcome::Stopped(session.driver_id))
    }

    /// Administrative deactivation by driver id.
    pub async fn deactivate(&self, driver_id: &DriverId) -> TrackingResult<bool> {
        let session = self.sessions.find(driver_id).await?;
        let deactivated = self.sessions.deactivate(driver_id).await?;

        if let Some(principal) = session.and_then(|s| s.reporting_principal) {
            self.prompts.stop(&principal).await;
        }

        if deactivated {
            info!("Driver {} deactivated", driver_id);
        }
        Ok(deactivated)
    }

    /// Explicitly (re)start re-prompting for a registered principal.
    pub async fn start_auto_prompt(&self, principal: &Principal) -> TrackingResult<AutoPromptOutcome> {
        let Some(session) = self.sessions.lookup_by_principal(principal).await? else {
            return Ok(AutoPromptOutcome::Rejected(Rejection::NotRegistered));
        };

        if self.prompts.start(principal, &session.driver_id).await {
            Ok(AutoPromptOutcome::Started)
        } else {
            Ok(AutoPromptOutcome::AlreadyRunning)
        }
    }

    /// Stop re-prompting without ending the session.
    pub async fn stop_auto_prompt(&self, principal: &Principal) -> TrackingResult<AutoPromptOutcome> {
        if self.sessions.lookup_by_principal(principal).await?.is_none() {
            self.prompts.stop(principal).await;
            return Ok(AutoPromptOutcome::Rejected(Rejection::NotRegistered));
        }

        if self.prompts.stop(principal).await {
            Ok(AutoPromptOutcome::Stopped)
        } else {
            Ok(AutoPromptOutcome::NotRunning)
        }
    }

    pub async fn list_active(&self) -> TrackingResult<Vec<SessionView>> {
        Ok(self.sessions.list_active().await?)
    }

    pub fn prompts(&self) -> &PromptRegistry {
        &self.prompts
    }

    /// Cancel every running prompt loop.
    pub async fn shutdown(&self) {
        self.prompts.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChannelError;
    use crate::prompt::ReportingChannel;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use common::error::DatabaseResult;
    use std::time::Duration;
    use tokio::sync::Notify;

    struct SilentChannel;

    #[async_trait]
    impl ReportingChannel for SilentChannel {
        async fn request_location(
            &self,
            _principal: &Principal,
            _driver_id: &DriverId,
        ) -> Result<(), ChannelError> {
            Ok(())
        }
    }

    /// Holds `gated`'s bind open after it has been written, so another
    /// claim can run to completion in between.
    struct GatedStore {
        inner: MemoryStore,
        gated: Principal,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl SessionStore for GatedStore {
        async fn create_session(&self, driver_id: &DriverId) -> DatabaseResult<()> {
            self.inner.create_session(driver_id).await
        }

        async fn bind_principal(
            &self,
            driver_id: &DriverId,
            principal: &Principal,
            display_name: Option<&str>,
        ) -> DatabaseResult<Binding> {
            let binding = self
                .inner
                .bind_principal(driver_id, principal, display_name)
                .await?;
            if principal == &self.gated {
                self.release.notified().await;
            }
            Ok(binding)
        }

        async fn lookup_by_principal(
            &self,
            principal: &Principal,
        ) -> DatabaseResult<Option<SessionView>> {
            self.inner.lookup_by_principal(principal).await
        }

        async fn find(&self, driver_id: &DriverId) -> DatabaseResult<Option<SessionView>> {
            self.inner.find(driver_id).await
        }

        async fn deactivate(&self, driver_id: &DriverId) -> DatabaseResult<bool> {
            self.inner.deactivate(driver_id).await
        }

        async fn list_active(&self) -> DatabaseResult<Vec<SessionView>> {
            self.inner.list_active().await
        }

        async fn ping(&self) -> bool {
            true
        }
    }

    fn manager(store: &MemoryStore) -> TrackingSessionManager {
        let prompts = PromptRegistry::new(Arc::new(SilentChannel), Duration::from_secs(30));
        TrackingSessionManager::new(
            Arc::new(store.clone()),
            prompts,
            LinkTemplate::new("tracker_bot"),
        )
    }

    #[tokio::test]
    async fn issued_link_embeds_driver_id() {
        let store = MemoryStore::new();
        let manager = manager(&store);

        let link = manager.issue_link().await.unwrap();

        assert_eq!(
            link.tracking_url,
            format!("https://t.me/tracker_bot?start={}", link.driver_id)
        );
        assert_eq!(link.instructions, LINK_INSTRUCTIONS);
        let view = store.find(&link.driver_id).await.unwrap().unwrap();
        assert!(view.is_active);
        assert!(!view.is_bound());
    }

    #[tokio::test]
    async fn issued_ids_are_unique() {
        let store = MemoryStore::new();
        let manager = manager(&store);

        let mut ids = std::collections::HashSet::new();
        for _ in 0..200 {
            ids.insert(manager.issue_link().await.unwrap().driver_id);
        }
        assert_eq!(ids.len(), 200);
        assert_eq!(store.session_count().await, 200);
    }

    #[tokio::test]
    async fn claim_unknown_link_is_rejected() {
        let store = MemoryStore::new();
        let manager = manager(&store);

        let outcome = manager
            .claim(&DriverId::from("garbage"), &Principal::from("alice"), None)
            .await
            .unwrap();

        assert_eq!(outcome, ClaimOutcome::Rejected(Rejection::Unknown));
        assert_eq!(store.session_count().await, 0);
        assert!(!manager.prompts().is_running(&Principal::from("alice")).await);
    }

    #[tokio::test]
    async fn reclaim_by_same_principal_is_idempotent() {
        let store = MemoryStore::new();
        let manager = manager(&store);
        let alice = Principal::from("alice");
        let link = manager.issue_link().await.unwrap();

        let first = manager.claim(&link.driver_id, &alice, Some("Alice")).await.unwrap();
        let second = manager.claim(&link.driver_id, &alice, Some("Alice")).await.unwrap();

        assert_eq!(
            first,
            ClaimOutcome::Accepted {
                driver_id: link.driver_id.clone(),
                prompting_started: true
            }
        );
        assert_eq!(
            second,
            ClaimOutcome::Accepted {
                driver_id: link.driver_id.clone(),
                prompting_started: false
            }
        );
        assert_eq!(manager.prompts().running_count().await, 1);
    }

    #[tokio::test]
    async fn later_principal_takes_over_the_slot() {
        let store = MemoryStore::new();
        let manager = manager(&store);
        let link = manager.issue_link().await.unwrap();
        let alice = Principal::from("alice");
        let mallory = Principal::from("mallory");

        manager.claim(&link.driver_id, &alice, None).await.unwrap();
        manager.claim(&link.driver_id, &mallory, None).await.unwrap();

        assert!(store.lookup_by_principal(&alice).await.unwrap().is_none());
        assert!(!manager.prompts().is_running(&alice).await);
        assert!(manager.prompts().is_running(&mallory).await);
        let view = store.lookup_by_principal(&mallory).await.unwrap().unwrap();
        assert_eq!(view.driver_id, link.driver_id);
    }

    #[tokio::test]
    async fn stop_is_terminal() {
        let store = MemoryStore::new();
        let manager = manager(&store);
        let alice = Principal::from("alice");
        let link = manager.issue_link().await.unwrap();
        manager.claim(&link.driver_id, &alice, None).await.unwrap();

        let stopped = manager.stop(&alice).await.unwrap();
        assert_eq!(stopped, StopOutcome::Stopped(link.driver_id.clone()));
        assert!(!manager.prompts().is_running(&alice).await);

        let again = manager.stop(&alice).await.unwrap();
        assert_eq!(again, StopOutcome::Rejected(Rejection::NotTracking));

        let reclaim = manager.claim(&link.driver_id, &alice, None).await.unwrap();
        assert_eq!(reclaim, ClaimOutcome::Rejected(Rejection::Unknown));
        assert!(manager.list_active().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unbound_session_can_be_deactivated() {
        let store = MemoryStore::new();
        let manager = manager(&store);
        let link = manager.issue_link().await.unwrap();

        assert!(manager.deactivate(&link.driver_id).await.unwrap());
        assert!(!manager.deactivate(&link.driver_id).await.unwrap());
        assert!(manager.list_active().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn auto_prompt_requires_registration() {
        let store = MemoryStore::new();
        let manager = manager(&store);
        let alice = Principal::from("alice");

        assert_eq!(
            manager.start_auto_prompt(&alice).await.unwrap(),
            AutoPromptOutcome::Rejected(Rejection::NotRegistered)
        );

        let link = manager.issue_link().await.unwrap();
        manager.claim(&link.driver_id, &alice, None).await.unwrap();

        assert_eq!(
            manager.start_auto_prompt(&alice).await.unwrap(),
            AutoPromptOutcome::AlreadyRunning
        );
        assert_eq!(
            manager.stop_auto_prompt(&alice).await.unwrap(),
            AutoPromptOutcome::Stopped
        );
        assert_eq!(
            manager.stop_auto_prompt(&alice).await.unwrap(),
            AutoPromptOutcome::NotRunning
        );
        assert_eq!(
            manager.start_auto_prompt(&alice).await.unwrap(),
            AutoPromptOutcome::Started
        );
    }

    #[tokio::test]
    async fn concurrent_claims_leave_only_the_owner_prompted() {
        let inner = MemoryStore::new();
        let first = Principal::from("p1");
        let second = Principal::from("p2");
        let driver = DriverId::from("d-1");
        let release = Arc::new(Notify::new());
        inner.create_session(&driver).await.unwrap();

        let store = GatedStore {
            inner: inner.clone(),
            gated: first.clone(),
            release: release.clone(),
        };
        let prompts = PromptRegistry::new(Arc::new(SilentChannel), Duration::from_secs(30));
        let manager =
            TrackingSessionManager::new(Arc::new(store), prompts, LinkTemplate::new("tracker_bot"));

        let racing = manager.clone();
        let (racing_driver, racing_principal) = (driver.clone(), first.clone());
        let slow_claim =
            tokio::spawn(async move { racing.claim(&racing_driver, &racing_principal, None).await });
        while inner.lookup_by_principal(&first).await.unwrap().is_none() {
            tokio::task::yield_now().await;
        }

        manager.claim(&driver, &second, None).await.unwrap();
        release.notify_one();
        let slow_outcome = slow_claim.await.unwrap().unwrap();

        assert_eq!(
            slow_outcome,
            ClaimOutcome::Accepted {
                driver_id: driver.clone(),
                prompting_started: false
            }
        );
        let owner = inner.find(&driver).await.unwrap().unwrap();
        assert_eq!(owner.reporting_principal, Some(second.clone()));
        assert!(!manager.prompts().is_running(&first).await);
        assert!(manager.prompts().is_running(&second).await);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn stop_cancels_loop_of_unbound_principal() {
        let store = MemoryStore::new();
        let manager = manager(&store);
        let stray = Principal::from("stray");
        manager.prompts().start(&stray, &DriverId::from("gone")).await;

        let outcome = manager.stop(&stray).await.unwrap();

        assert_eq!(outcome, StopOutcome::Rejected(Rejection::NotTracking));
        assert!(!manager.prompts().is_running(&stray).await);
    }

    #[tokio::test]
    async fn stop_auto_prompt_cancels_loop_of_unbound_principal() {
        let store = MemoryStore::new();
        let manager = manager(&store);
        let stray = Principal::from("stray");
        manager.prompts().start(&stray, &DriverId::from("gone")).await;

        let outcome = manager.stop_auto_prompt(&stray).await.unwrap();

        assert_eq!(outcome, AutoPromptOutcome::Rejected(Rejection::NotRegistered));
        assert!(!manager.prompts().is_running(&stray).await);
    }
}
