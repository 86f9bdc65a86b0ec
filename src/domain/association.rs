//! Position Associations
//!
//! Links between positions on different roles, created when trades are
//! entered and read at exit time to drive the cascade.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::account::AccountRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssociationKind {
    ShadowToOwner,
    SlaveToShadow,
    SlaveToOwner,
}

impl AssociationKind {
    /// The two role slots that must be populated for this kind
    pub fn roles(&self) -> [AccountRole; 2] {
        match self {
            AssociationKind::ShadowToOwner => [AccountRole::Shadow, AccountRole::Owner],
            AssociationKind::SlaveToShadow => [AccountRole::Slave, AccountRole::Shadow],
            AssociationKind::SlaveToOwner => [AccountRole::Slave, AccountRole::Owner],
        }
    }

    pub fn includes(&self, role: AccountRole) -> bool {
        self.roles().contains(&role)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum AssociationError {
    #[error("{kind:?} requires the {role} slot to be set")]
    MissingSlot { kind: AssociationKind, role: AccountRole },
    #[error("{kind:?} does not allow the {role} slot to be set")]
    UnexpectedSlot { kind: AssociationKind, role: AccountRole },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Association {
    pub id: String,
    pub user_id: String,
    pub owner_position_id: Option<String>,
    pub shadow_position_id: Option<String>,
    pub slave_position_id: Option<String>,
    pub kind: AssociationKind,
    pub created_at: DateTime<Utc>,
}

impl Association {
    /// Build an association from its two populated slots.
    ///
    /// `first` and `second` are matched to the roles implied by `kind`,
    /// in the order `kind.roles()` lists them.
    pub fn new(
        user_id: impl Into<String>,
        kind: AssociationKind,
        first: impl Into<String>,
        second: impl Into<String>,
    ) -> Self {
        let [a, b] = kind.roles();
        let mut assoc = Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            owner_position_id: None,
            shadow_position_id: None,
            slave_position_id: None,
            kind,
            created_at: Utc::now(),
        };
        *assoc.slot_mut(a) = Some(first.into());
        *assoc.slot_mut(b) = Some(second.into());
        assoc
    }

    pub fn slot(&self, role: AccountRole) -> Option<&str> {
        match role {
            AccountRole::Owner => self.owner_position_id.as_deref(),
            AccountRole::Shadow => self.shadow_position_id.as_deref(),
            AccountRole::Slave => self.slave_position_id.as_deref(),
        }
    }

    fn slot_mut(&mut self, role: AccountRole) -> &mut Option<String> {
        match role {
            AccountRole::Owner => &mut self.owner_position_id,
            AccountRole::Shadow => &mut self.shadow_position_id,
            AccountRole::Slave => &mut self.slave_position_id,
        }
    }

    /// True when `position_id` sits in the `role` slot
    pub fn references(&self, role: AccountRole, position_id: &str) -> bool {
        self.slot(role) == Some(position_id)
    }

    /// Populated slots, in owner/shadow/slave order
    pub fn populated(&self) -> Vec<(AccountRole, &str)> {
        AccountRole::ALL
            .iter()
            .filter_map(|role| self.slot(*role).map(|id| (*role, id)))
            .collect()
    }

    /// Populated slots must match the kind exactly
    pub fn validate(&self) -> Result<(), AssociationError> {
        for role in AccountRole::ALL {
            let expected = self.kind.includes(role);
            let present = self.slot(role).map_or(false, |id| !id.is_empty());
            if expected && !present {
                return Err(AssociationError::MissingSlot { kind: self.kind, role });
            }
            if !expected && self.slot(role).is_some() {
                return Err(AssociationError::UnexpectedSlot { kind: self.kind, role });
            }
        }
        Ok(())
    }
}
