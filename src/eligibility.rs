//! Onboarding gate: only events for accepted organizations/repositories
//! mutate state.
//!
//! A missing or not-yet-accepted owner is the normal "not onboarded" path,
//! so the gate answers `false` rather than erroring; handlers turn that
//! into a silent skip.

use crate::events::payload::{external_id, OrganizationPayload, RepositoryPayload, UserPayload};
use crate::store::records::{OrgState, RepoState};
use crate::store::{BountyStore, StoreError};

/// Whether events for this repository may be processed.
///
/// Organization-owned repositories are gated on the owning organization's
/// state; user-owned repositories on the repository's own state.
pub async fn is_event_eligible(
    store: &dyn BountyStore,
    repository: &RepositoryPayload,
    organization: Option<&OrganizationPayload>,
) -> Result<bool, StoreError> {
    if repository.is_organization_owned() {
        let organization = match organization {
            Some(organization) => {
                store
                    .organization(&external_id(&organization.node_id, organization.id))
                    .await?
            }
            // Some payloads omit the organization object; fall back to the
            // repository owner's login.
            None => match repository.owner.as_ref() {
                Some(owner) => store.organization_by_login(&owner.login).await?,
                None => None,
            },
        };
        return Ok(organization.is_some_and(|o| o.state == OrgState::Accepted));
    }

    let repository = store
        .repository(&external_id(&repository.node_id, repository.id))
        .await?;
    Ok(repository.is_some_and(|r| r.state == RepoState::Accepted))
}

/// Installation-scoped variant: resolves eligibility from the installation
/// account rather than a specific repository.
pub async fn is_installation_eligible(
    store: &dyn BountyStore,
    account: &UserPayload,
) -> Result<bool, StoreError> {
    let is_organization = account
        .kind
        .as_deref()
        .is_some_and(|kind| kind.eq_ignore_ascii_case("organization"));

    if is_organization {
        let organization = store.organization_by_login(&account.login).await?;
        return Ok(organization.is_some_and(|o| o.state == OrgState::Accepted));
    }

    // A user account is eligible if any of their repositories is accepted.
    let repositories = store.repositories_for_owner(&account.login).await?;
    Ok(repositories.iter().any(|r| r.state == RepoState::Accepted))
}
