//! Recipient resolver. Completes missing contact fields from the profile store.
//!
//! Resolution never fails the delivery. A recipient that cannot be completed is
//! returned as `Unresolved` and the channel adapter reports the missing address.

use std::sync::Arc;

use herald_common::types::Recipient;

use crate::store::ProfileStore;

/// Outcome of resolving a recipient stub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Contact data is complete, either as supplied or after a profile lookup.
    Resolved(Recipient),
    /// The lookup was skipped, failed, or found nothing; the stub is unchanged.
    Unresolved(Recipient),
}

impl Resolution {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Resolution::Resolved(_))
    }

    pub fn into_recipient(self) -> Recipient {
        match self {
            Resolution::Resolved(r) | Resolution::Unresolved(r) => r,
        }
    }
}

pub struct RecipientResolver {
    profiles: Arc<dyn ProfileStore>,
}

impl RecipientResolver {
    pub fn new(profiles: Arc<dyn ProfileStore>) -> Self {
        Self { profiles }
    }

    pub async fn resolve(&self, recipient: Recipient) -> Resolution {
        if recipient.has_full_contact() {
            return Resolution::Resolved(recipient);
        }
        let Some(id) = recipient.id else {
            return Resolution::Unresolved(recipient);
        };

        let contact = match self.profiles.find_contact(recipient.kind, id).await {
            Ok(Some(contact)) => contact,
            Ok(None) => {
                tracing::debug!(recipient_id = %id, kind = %recipient.kind, "No profile found for recipient");
                return Resolution::Unresolved(recipient);
            }
            Err(e) => {
                tracing::warn!(
                    recipient_id = %id,
                    kind = %recipient.kind,
                    error = %e,
                    "Profile lookup failed, delivering with supplied contact data"
                );
                return Resolution::Unresolved(recipient);
            }
        };

        // Caller-supplied values win over stored ones.
        Resolution::Resolved(Recipient {
            email: recipient.email.or(contact.email),
            phone: recipient.phone.or(contact.phone),
            ..recipient
        })
    }
}
