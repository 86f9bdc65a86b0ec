//! Auto-Close Service
//!
//! Turns a detected close into a cascade: resolves the trigger's
//! associations, asks the rule engine which dependents to close and runs the
//! resulting closes concurrently. Sibling targets never abort each other.

use futures::future::join_all;
use std::sync::Arc;

use crate::domain::{
    cascade, find_account, AccountRole, ActiveAccount, CascadeAction, CascadeCounts,
    CascadeTarget, NewNotification, NotificationPayload, PositionRef,
};
use crate::ports::{AssociationStore, CredentialVault, VenueClient, VenueConnector};
use super::closer::{CloseOutcome, PositionCloser, TriggerContext, REASON_ACCOUNT_NOT_FOUND, REASON_CLOSE_FAILED};
use super::notifications::NotificationManager;

/// Placeholder account id for targets without an active account
const NO_ACCOUNT: &str = "-";

#[derive(Debug, Clone, Default)]
pub struct CascadeReport {
    pub outcomes: Vec<(PositionRef, CloseOutcome)>,
    pub counts: CascadeCounts,
}

impl CascadeReport {
    fn from_outcomes(outcomes: Vec<(PositionRef, CloseOutcome)>) -> Self {
        let mut counts = CascadeCounts::default();
        for (_, outcome) in &outcomes {
            match outcome.action {
                CascadeAction::Closed => counts.closed += 1,
                CascadeAction::Skipped => counts.skipped += 1,
                CascadeAction::Failed => counts.failed += 1,
            }
        }
        Self { outcomes, counts }
    }
}

pub struct AutoCloseService {
    associations: Arc<dyn AssociationStore>,
    vault: Arc<dyn CredentialVault>,
    connector: Arc<dyn VenueConnector>,
    closer: PositionCloser,
    notifications: Arc<NotificationManager>,
}

impl AutoCloseService {
    pub fn new(
        associations: Arc<dyn AssociationStore>,
        vault: Arc<dyn CredentialVault>,
        connector: Arc<dyn VenueConnector>,
        closer: PositionCloser,
        notifications: Arc<NotificationManager>,
    ) -> Self {
        Self {
            associations,
            vault,
            connector,
            closer,
            notifications,
        }
    }

    /// Cascade a close of `position_id` on `trigger_account`.
    ///
    /// `accounts` is the active account set of the current monitor cycle.
    pub async fn on_position_closed(
        &self,
        trigger_account: &ActiveAccount,
        position_id: &str,
        accounts: &[ActiveAccount],
    ) -> CascadeReport {
        // Slave has no outgoing edges
        if trigger_account.role == AccountRole::Slave {
            return CascadeReport::default();
        }

        let user_id = trigger_account.user_id.as_str();
        let associations = match self
            .associations
            .find_by_position(user_id, trigger_account.role, position_id)
            .await
        {
            Ok(found) => found,
            Err(e) => {
                tracing::error!(
                    "Association lookup failed for {} trade {}: {}",
                    trigger_account.role,
                    position_id,
                    e
                );
                self.notify(
                    NewNotification::new(
                        user_id,
                        trigger_account.role,
                        "Auto-close failed",
                        format!("Could not resolve trades linked to {} trade {}", trigger_account.role, position_id),
                        NotificationPayload::Error { error: e.to_string() },
                    )
                    .for_position(position_id),
                )
                .await;
                return CascadeReport::default();
            }
        };

        if associations.is_empty() {
            tracing::debug!("No associations for {} trade {}", trigger_account.role, position_id);
            return CascadeReport::default();
        }

        let targets = cascade::decide(trigger_account.role, position_id, &associations, |role| {
            find_account(accounts, user_id, role).map(|a| a.config.clone())
        });

        let context = TriggerContext {
            user_id: user_id.to_string(),
            trigger: PositionRef::new(trigger_account.account_id.clone(), trigger_account.role, position_id),
        };

        tracing::info!(
            "Cascading {} trade {} to {} target(s)",
            trigger_account.role,
            position_id,
            targets.len()
        );

        let outcomes = join_all(
            targets
                .into_iter()
                .map(|target| self.dispatch(target, &context, accounts)),
        )
        .await;
        let report = CascadeReport::from_outcomes(outcomes);

        let counts = report.counts;
        if counts.closed > 0 || counts.failed > 0 {
            self.notify(
                NewNotification::new(
                    user_id,
                    trigger_account.role,
                    "Auto-close summary",
                    format!(
                        "{} trades closed, {} skipped, {} failed",
                        counts.closed, counts.skipped, counts.failed
                    ),
                    NotificationPayload::Info {
                        summary: Some(counts),
                    },
                )
                .for_position(position_id),
            )
            .await;
        }

        report
    }

    async fn dispatch(
        &self,
        target: CascadeTarget,
        context: &TriggerContext,
        accounts: &[ActiveAccount],
    ) -> (PositionRef, CloseOutcome) {
        let account = find_account(accounts, &context.user_id, target.target_role);
        let target_ref = PositionRef::new(
            account.map_or(NO_ACCOUNT, |a| a.account_id.as_str()),
            target.target_role,
            target.target_position_id.clone(),
        );

        let outcome = if !target.should_close {
            self.closer
                .settle(target_ref.clone(), context, CloseOutcome::skipped(target.reason))
                .await
        } else {
            match account {
                None => {
                    let error = format!("no active {} account for user {}", target.target_role, context.user_id);
                    self.closer
                        .settle(target_ref.clone(), context, CloseOutcome::failed(REASON_ACCOUNT_NOT_FOUND, error))
                        .await
                }
                Some(account) => match self.connect(account).await {
                    Ok(venue) => {
                        self.closer
                            .attempt_close(venue.as_ref(), target_ref.clone(), context)
                            .await
                    }
                    Err(error) => {
                        self.closer
                            .settle(target_ref.clone(), context, CloseOutcome::failed(REASON_CLOSE_FAILED, error))
                            .await
                    }
                },
            }
        };

        (target_ref, outcome)
    }

    async fn connect(&self, account: &ActiveAccount) -> Result<Arc<dyn VenueClient>, String> {
        let credentials = self
            .vault
            .credentials(&account.account_id)
            .await
            .map_err(|e| e.to_string())?;
        self.connector
            .connect(account, &credentials)
            .map_err(|e| e.to_string())
    }

    async fn notify(&self, notification: NewNotification) {
        if let Err(e) = self.notifications.create(notification).await {
            tracing::error!("Failed to create notification: {}", e);
        }
    }
}
