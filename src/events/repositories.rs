//! Handlers for repository onboarding, stars, collaborators and
//! visibility.

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};

use crate::events::payload::{
    external_id, InstallationPayload, InstallationRepositoryPayload, WebhookPayload,
};
use crate::events::{Outcome, Skip};
use crate::recovery;
use crate::store::records::{
    IssuePatch, OwnerType, RepoState, RepositoryPatch, UserRef,
};
use crate::store::BountyStore;
use crate::AppState;

fn installation_owner(installation: &InstallationPayload) -> Option<(UserRef, OwnerType)> {
    let account = installation.account.as_ref()?;
    let owner_type = if account
        .kind
        .as_deref()
        .is_some_and(|kind| kind.eq_ignore_ascii_case("organization"))
    {
        OwnerType::Organization
    } else {
        OwnerType::User
    };
    Some((
        UserRef {
            login: account.login.clone(),
            avatar_url: account.avatar_url.clone(),
        },
        owner_type,
    ))
}

async fn upsert_installed_repository(
    state: &Arc<AppState>,
    repository: &InstallationRepositoryPayload,
    installation: &InstallationPayload,
    repo_state: RepoState,
) -> Result<()> {
    let (owner, owner_type) = match installation_owner(installation) {
        Some(parts) => parts,
        None => return Ok(()),
    };

    state
        .store
        .create_or_update_repository(RepositoryPatch {
            repository_id: external_id(&repository.node_id, repository.id),
            name: Some(repository.name.clone()),
            full_name: Some(repository.full_name.clone()),
            private: Some(repository.private),
            owner: Some(owner),
            owner_type: Some(owner_type),
            state: Some(repo_state),
            installation_id: Some(installation.id),
            ..Default::default()
        })
        .await?;
    Ok(())
}

/// `installation.created`: register every listed repository as pending and
/// kick off a background recovery crawl for organization accounts.
pub async fn handle_installation_created(
    state: &Arc<AppState>,
    payload: &WebhookPayload,
) -> Result<Outcome> {
    let Some(installation) = payload.installation.as_ref() else {
        return Ok(Outcome::skipped(Skip::MissingField("installation")));
    };
    let repositories = payload.repositories.as_deref().unwrap_or_default();

    for repository in repositories {
        upsert_installed_repository(state, repository, installation, RepoState::Pending).await?;
    }
    info!(
        "installation {} registered {} repositories",
        installation.id,
        repositories.len()
    );

    if let Some(account) = installation.account.as_ref() {
        let is_organization = account
            .kind
            .as_deref()
            .is_some_and(|kind| kind.eq_ignore_ascii_case("organization"));
        if is_organization {
            let state = state.clone();
            let installation_id = installation.id;
            let login = account.login.clone();
            tokio::spawn(async move {
                match recovery::recover_organization(&state, installation_id, &login).await {
                    Ok(summary) => info!("recovery of {login} finished: {summary}"),
                    Err(e) => error!("recovery of {login} failed: {e:#}"),
                }
            });
        }
    }

    Ok(Outcome::Completed)
}

/// `installation_repositories.added`.
pub async fn handle_installation_repositories_added(
    state: &Arc<AppState>,
    payload: &WebhookPayload,
) -> Result<Outcome> {
    let Some(installation) = payload.installation.as_ref() else {
        return Ok(Outcome::skipped(Skip::MissingField("installation")));
    };
    for repository in payload.repositories_added.as_deref().unwrap_or_default() {
        upsert_installed_repository(state, repository, installation, RepoState::Pending).await?;
    }
    Ok(Outcome::Completed)
}

/// `installation_repositories.removed`: the repository leaves the
/// marketplace; the record stays, marked deleted.
pub async fn handle_installation_repositories_removed(
    state: &Arc<AppState>,
    payload: &WebhookPayload,
) -> Result<Outcome> {
    let Some(installation) = payload.installation.as_ref() else {
        return Ok(Outcome::skipped(Skip::MissingField("installation")));
    };
    for repository in payload.repositories_removed.as_deref().unwrap_or_default() {
        upsert_installed_repository(state, repository, installation, RepoState::Deleted).await?;
    }
    Ok(Outcome::Completed)
}

/// `star.{created,deleted}`: keep the star count current.
pub async fn handle_star(state: &Arc<AppState>, payload: &WebhookPayload) -> Result<Outcome> {
    let Some(repository) = payload.repository.as_ref() else {
        return Ok(Outcome::skipped(Skip::MissingField("repository")));
    };

    let repository_id = external_id(&repository.node_id, repository.id);
    let patch = RepositoryPatch {
        repository_id: repository_id.clone(),
        stars: repository.stargazers_count,
        forks: repository.forks_count,
        ..Default::default()
    };
    match state.store.update_repository(&repository_id, patch).await {
        Ok(_) => Ok(Outcome::Completed),
        Err(e) if e.is_not_found() => Ok(Outcome::skipped(Skip::NotFound("repository"))),
        Err(e) => Err(e.into()),
    }
}

/// `member.{added,removed}`: maintain the collaborator list, which is
/// denormalized onto the repository's issues for access control.
pub async fn handle_collaborator_change(
    state: &Arc<AppState>,
    payload: &WebhookPayload,
) -> Result<Outcome> {
    let Some(repository) = payload.repository.as_ref() else {
        return Ok(Outcome::skipped(Skip::MissingField("repository")));
    };
    let Some(member) = payload.member.as_ref() else {
        return Ok(Outcome::skipped(Skip::MissingField("member")));
    };
    let added = payload.action.as_deref() == Some("added");

    let repository_id = external_id(&repository.node_id, repository.id);
    let Some(record) = state.store.repository(&repository_id).await? else {
        return Ok(Outcome::skipped(Skip::NotFound("repository")));
    };

    let mut collaborators = record.collaborators.clone();
    if added {
        if !collaborators.iter().any(|c| c == &member.login) {
            collaborators.push(member.login.clone());
        }
    } else {
        collaborators.retain(|c| c != &member.login);
    }

    state
        .store
        .update_repository(
            &repository_id,
            RepositoryPatch {
                repository_id: repository_id.clone(),
                collaborators: Some(collaborators.clone()),
                ..Default::default()
            },
        )
        .await?;

    for issue in state.store.issues_for_repository(&repository_id).await? {
        state
            .store
            .update_issue(
                &issue.issue_id,
                IssuePatch {
                    issue_id: issue.issue_id.clone(),
                    collaborators: Some(collaborators.clone()),
                    ..Default::default()
                },
            )
            .await?;
    }

    Ok(Outcome::Completed)
}

/// `repository.{privatized,publicized}`: flip the privacy flag on the
/// repository and its mirrored issues.
pub async fn handle_visibility_change(
    state: &Arc<AppState>,
    payload: &WebhookPayload,
) -> Result<Outcome> {
    let Some(repository) = payload.repository.as_ref() else {
        return Ok(Outcome::skipped(Skip::MissingField("repository")));
    };
    let private = payload.action.as_deref() == Some("privatized");

    let repository_id = external_id(&repository.node_id, repository.id);
    let patch = RepositoryPatch {
        repository_id: repository_id.clone(),
        private: Some(private),
        ..Default::default()
    };
    match state.store.update_repository(&repository_id, patch).await {
        Ok(_) => {}
        Err(e) if e.is_not_found() => {
            return Ok(Outcome::skipped(Skip::NotFound("repository")))
        }
        Err(e) => return Err(e.into()),
    }

    for issue in state.store.issues_for_repository(&repository_id).await? {
        state
            .store
            .update_issue(
                &issue.issue_id,
                IssuePatch {
                    issue_id: issue.issue_id.clone(),
                    private: Some(private),
                    ..Default::default()
                },
            )
            .await?;
    }

    Ok(Outcome::Completed)
}
