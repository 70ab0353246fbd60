//! Test doubles for the GitHub and Discord collaborators.
//!
//! Both record every call so tests can assert on the side effects, and
//! both can be primed with canned data (org rosters, linked issues,
//! GraphQL pages).

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::discord::{CreatedThread, DiscordApi};
use crate::github::{GitHubApi, OrgMemberInfo};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedComment {
    pub owner: String,
    pub repo: String,
    pub issue_number: u64,
    pub body: String,
}

#[derive(Default)]
pub struct MockGitHub {
    members: Mutex<HashMap<String, Vec<OrgMemberInfo>>>,
    linked: Mutex<HashMap<(String, String, u64), Vec<u64>>>,
    comments: Mutex<Vec<RecordedComment>>,
    graphql_pages: Mutex<VecDeque<serde_json::Value>>,
}

impl MockGitHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_members(&self, org: &str, logins: &[&str]) {
        let members = logins
            .iter()
            .map(|login| OrgMemberInfo {
                login: login.to_string(),
                avatar_url: None,
                role: Some("member".to_string()),
            })
            .collect();
        self.members
            .lock()
            .unwrap()
            .insert(org.to_string(), members);
    }

    pub fn set_linked_issues(&self, owner: &str, repo: &str, pr_number: u64, issues: &[u64]) {
        self.linked.lock().unwrap().insert(
            (owner.to_string(), repo.to_string(), pr_number),
            issues.to_vec(),
        );
    }

    /// Queue a GraphQL `data` document; each call to `graphql` pops one.
    pub fn push_graphql_page(&self, data: serde_json::Value) {
        self.graphql_pages.lock().unwrap().push_back(data);
    }

    pub fn comments(&self) -> Vec<RecordedComment> {
        self.comments.lock().unwrap().clone()
    }
}

#[async_trait]
impl GitHubApi for MockGitHub {
    async fn create_issue_comment(
        &self,
        _installation_id: u64,
        owner: &str,
        repo: &str,
        issue_number: u64,
        body: &str,
    ) -> Result<()> {
        self.comments.lock().unwrap().push(RecordedComment {
            owner: owner.to_string(),
            repo: repo.to_string(),
            issue_number,
            body: body.to_string(),
        });
        Ok(())
    }

    async fn organization_members(
        &self,
        _installation_id: u64,
        org: &str,
    ) -> Result<Vec<OrgMemberInfo>> {
        Ok(self
            .members
            .lock()
            .unwrap()
            .get(org)
            .cloned()
            .unwrap_or_default())
    }

    async fn linked_issue_numbers(
        &self,
        _installation_id: u64,
        owner: &str,
        repo: &str,
        pr_number: u64,
    ) -> Result<Vec<u64>> {
        Ok(self
            .linked
            .lock()
            .unwrap()
            .get(&(owner.to_string(), repo.to_string(), pr_number))
            .cloned()
            .unwrap_or_default())
    }

    async fn graphql(
        &self,
        _installation_id: u64,
        _query: &str,
        _variables: serde_json::Value,
    ) -> Result<serde_json::Value> {
        self.graphql_pages
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow!("no queued GraphQL page"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ButtonMessage {
    pub channel_id: String,
    pub content: String,
    pub custom_id: String,
    pub label: String,
}

#[derive(Default)]
pub struct MockDiscord {
    threads: Mutex<Vec<CreatedThread>>,
    members: Mutex<HashMap<String, Vec<String>>>,
    messages: Mutex<Vec<(String, String)>>,
    buttons: Mutex<Vec<ButtonMessage>>,
    fail_member_adds: Mutex<bool>,
}

impl MockDiscord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `add_thread_member` calls fail, for partial-success
    /// scenarios.
    pub fn fail_member_adds(&self, fail: bool) {
        *self.fail_member_adds.lock().unwrap() = fail;
    }

    pub fn created_threads(&self) -> Vec<CreatedThread> {
        self.threads.lock().unwrap().clone()
    }

    pub fn thread_members(&self, thread_id: &str) -> Vec<String> {
        self.members
            .lock()
            .unwrap()
            .get(thread_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().unwrap().clone()
    }

    pub fn button_messages(&self) -> Vec<ButtonMessage> {
        self.buttons.lock().unwrap().clone()
    }
}

#[async_trait]
impl DiscordApi for MockDiscord {
    async fn create_private_thread(
        &self,
        _channel_id: &str,
        name: &str,
        _reason: &str,
    ) -> Result<CreatedThread> {
        let mut threads = self.threads.lock().unwrap();
        let thread = CreatedThread {
            id: format!("thread-{}", threads.len() + 1),
            name: name.to_string(),
        };
        threads.push(thread.clone());
        Ok(thread)
    }

    async fn add_thread_member(&self, thread_id: &str, user_id: &str) -> Result<()> {
        if *self.fail_member_adds.lock().unwrap() {
            return Err(anyhow!("member add rejected"));
        }
        let mut members = self.members.lock().unwrap();
        let entry = members.entry(thread_id.to_string()).or_default();
        if !entry.iter().any(|m| m == user_id) {
            entry.push(user_id.to_string());
        }
        Ok(())
    }

    async fn remove_thread_member(&self, thread_id: &str, user_id: &str) -> Result<()> {
        let mut members = self.members.lock().unwrap();
        if let Some(entry) = members.get_mut(thread_id) {
            entry.retain(|m| m != user_id);
        }
        Ok(())
    }

    async fn send_message(&self, channel_id: &str, content: &str) -> Result<()> {
        self.messages
            .lock()
            .unwrap()
            .push((channel_id.to_string(), content.to_string()));
        Ok(())
    }

    async fn send_message_with_button(
        &self,
        channel_id: &str,
        content: &str,
        custom_id: &str,
        label: &str,
    ) -> Result<()> {
        self.buttons.lock().unwrap().push(ButtonMessage {
            channel_id: channel_id.to_string(),
            content: content.to_string(),
            custom_id: custom_id.to_string(),
            label: label.to_string(),
        });
        Ok(())
    }
}
