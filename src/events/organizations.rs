//! Handlers for `organization.*` events.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::events::payload::{external_id, WebhookPayload};
use crate::events::{Outcome, Skip};
use crate::store::records::{OrgMember, OrganizationPatch};
use crate::store::BountyStore;
use crate::AppState;

/// `organization.member_{added,removed}`: refetch the full roster rather
/// than patching incrementally, so the mirror cannot drift. The replace
/// preserves locally-set `can_edit` flags (see the record merge rules).
pub async fn handle_member_change(
    state: &Arc<AppState>,
    payload: &WebhookPayload,
) -> Result<Outcome> {
    let Some(organization) = payload.organization.as_ref() else {
        return Ok(Outcome::skipped(Skip::MissingField("organization")));
    };
    let Some(installation) = payload.installation.as_ref() else {
        return Ok(Outcome::skipped(Skip::MissingField("installation")));
    };

    let organization_id = external_id(&organization.node_id, organization.id);
    if state.store.organization(&organization_id).await?.is_none() {
        return Ok(Outcome::skipped(Skip::NotFound("organization")));
    }

    let roster = state
        .github
        .organization_members(installation.id, &organization.login)
        .await?;
    let members: Vec<OrgMember> = roster
        .into_iter()
        .map(|member| OrgMember {
            login: member.login,
            avatar_url: member.avatar_url,
            role: member.role,
            can_edit: false,
        })
        .collect();

    info!(
        "refreshed {} members for organization {}",
        members.len(),
        organization.login
    );

    state
        .store
        .update_organization(
            &organization_id,
            OrganizationPatch {
                organization_id: organization_id.clone(),
                members: Some(members),
                ..Default::default()
            },
        )
        .await?;

    Ok(Outcome::Completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::dispatch;
    use crate::store::records::{OrgState, OrganizationPatch};
    use crate::store::{BountyStore, MemoryStore};
    use crate::testing::{MockDiscord, MockGitHub};
    use serde_json::json;

    #[tokio::test]
    async fn member_added_refreshes_roster_preserving_can_edit() {
        let store = MemoryStore::new();
        store
            .create_or_update_organization(OrganizationPatch {
                organization_id: "O_acme".into(),
                login: Some("acme".into()),
                title: Some("Acme".into()),
                state: Some(OrgState::Accepted),
                // can_edit granted through the admin surface.
                members: Some(vec![OrgMember {
                    login: "octo".into(),
                    avatar_url: None,
                    role: Some("admin".into()),
                    can_edit: true,
                }]),
                ..Default::default()
            })
            .await
            .unwrap();

        let github = Arc::new(MockGitHub::new());
        github.set_members("acme", &["octo", "newcomer"]);

        let state = Arc::new(AppState {
            store: Arc::new(store),
            github: github.clone(),
            discord: Arc::new(MockDiscord::new()),
            webhook_secret: "secret".into(),
            discord_public_key: String::new(),
            bounty_channel_id: "chan-1".into(),
        });

        let payload: WebhookPayload = serde_json::from_value(json!({
            "action": "member_added",
            "organization": { "id": 77, "node_id": "O_acme", "login": "acme" },
            "installation": { "id": 12345 }
        }))
        .unwrap();

        let outcome = dispatch(&state, "organization", &payload).await.unwrap();
        assert_eq!(outcome, Outcome::Completed);

        let organization = state.store.organization("O_acme").await.unwrap().unwrap();
        assert_eq!(organization.members.len(), 2);
        let octo = organization
            .members
            .iter()
            .find(|m| m.login == "octo")
            .unwrap();
        assert!(octo.can_edit, "roster refresh must not clobber can_edit");
        let newcomer = organization
            .members
            .iter()
            .find(|m| m.login == "newcomer")
            .unwrap();
        assert!(!newcomer.can_edit);
    }

    #[tokio::test]
    async fn unknown_organization_is_a_typed_skip() {
        let state = Arc::new(AppState {
            store: Arc::new(MemoryStore::new()),
            github: Arc::new(MockGitHub::new()),
            discord: Arc::new(MockDiscord::new()),
            webhook_secret: "secret".into(),
            discord_public_key: String::new(),
            bounty_channel_id: "chan-1".into(),
        });

        let payload: WebhookPayload = serde_json::from_value(json!({
            "action": "member_removed",
            "organization": { "id": 78, "node_id": "O_other", "login": "other" },
            "installation": { "id": 12345 }
        }))
        .unwrap();

        let outcome = dispatch(&state, "organization", &payload).await.unwrap();
        assert_eq!(outcome, Outcome::Skipped(Skip::NotFound("organization")));
    }
}
