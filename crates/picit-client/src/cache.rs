use std::collections::HashMap;

use futures_util::future::join_all;
use tokio::sync::Mutex;
use uuid::Uuid;

use picit_types::api::{CreateTaskRequest, FollowResponse, LikeResponse};
use picit_types::models::{Comment, FeedPost, FollowStats, Post, Profile, Task, User};

use crate::client::PicitClient;
use crate::error::{ClientError, Result};

/// Read-through cache over [`PicitClient`] for the data several screens
/// share: profiles (with follow stats), open tasks and the feed.
///
/// Reads are served from memory after the first fetch. Every mutation made
/// through this type drops the entries it affects.
pub struct CachedClient {
    client: PicitClient,
    profiles: Mutex<HashMap<Uuid, Profile>>,
    tasks: Mutex<HashMap<Uuid, Vec<Task>>>,
    feed: Mutex<Option<Vec<FeedPost>>>,
}

impl CachedClient {
    pub fn new(client: PicitClient) -> Self {
        Self {
            client,
            profiles: Mutex::new(HashMap::new()),
            tasks: Mutex::new(HashMap::new()),
            feed: Mutex::new(None),
        }
    }

    /// The underlying client, for calls that bypass the cache.
    pub fn client(&self) -> &PicitClient {
        &self.client
    }

    // -- Reads --

    pub async fn profile(&self, user_id: Uuid) -> Result<Profile> {
        if let Some(profile) = self.profiles.lock().await.get(&user_id) {
            return Ok(profile.clone());
        }
        let profile = self.client.profile(user_id).await?;
        self.profiles.lock().await.insert(user_id, profile.clone());
        Ok(profile)
    }

    /// Several profiles at once. Misses are fetched concurrently.
    pub async fn profiles(&self, user_ids: &[Uuid]) -> Result<HashMap<Uuid, Profile>> {
        let mut found = HashMap::new();
        let mut missing = Vec::new();
        {
            let cached = self.profiles.lock().await;
            for id in user_ids {
                match cached.get(id) {
                    Some(profile) => {
                        found.insert(*id, profile.clone());
                    }
                    None if !missing.contains(id) => missing.push(*id),
                    None => {}
                }
            }
        }

        let fetched = join_all(missing.iter().map(|id| self.client.profile(*id))).await;
        let mut cached = self.profiles.lock().await;
        for (id, result) in missing.into_iter().zip(fetched) {
            let profile = result?;
            cached.insert(id, profile.clone());
            found.insert(id, profile);
        }
        Ok(found)
    }

    pub async fn follow_stats(&self, user_id: Uuid) -> Result<FollowStats> {
        let profile = self.profile(user_id).await?;
        Ok(FollowStats {
            follower_count: profile.follower_count,
            following_count: profile.following_count,
        })
    }

    /// Open tasks of `user_id`.
    pub async fn tasks(&self, user_id: Uuid) -> Result<Vec<Task>> {
        if let Some(tasks) = self.tasks.lock().await.get(&user_id) {
            return Ok(tasks.clone());
        }
        let tasks = self.client.user_tasks(user_id).await?;
        self.tasks.lock().await.insert(user_id, tasks.clone());
        Ok(tasks)
    }

    pub async fn feed(&self) -> Result<Vec<FeedPost>> {
        if let Some(feed) = self.feed.lock().await.as_ref() {
            return Ok(feed.clone());
        }
        let feed = self.client.feed(None).await?;
        *self.feed.lock().await = Some(feed.clone());
        Ok(feed)
    }

    // -- Invalidation --

    pub async fn invalidate_profile(&self, user_id: Uuid) {
        self.profiles.lock().await.remove(&user_id);
    }

    pub async fn invalidate_tasks(&self, user_id: Uuid) {
        self.tasks.lock().await.remove(&user_id);
    }

    pub async fn invalidate_feed(&self) {
        *self.feed.lock().await = None;
    }

    pub async fn clear(&self) {
        self.profiles.lock().await.clear();
        self.tasks.lock().await.clear();
        self.invalidate_feed().await;
    }

    // -- Mutations --

    pub async fn update_profile(&self, username: &str, name: &str, website: &str) -> Result<User> {
        let user = self.client.update_profile(username, name, website).await?;
        self.invalidate_profile(user.id).await;
        self.invalidate_feed().await;
        Ok(user)
    }

    pub async fn upload_avatar(&self, jpeg: Vec<u8>) -> Result<User> {
        let user = self.client.upload_avatar(jpeg).await?;
        self.invalidate_profile(user.id).await;
        self.invalidate_feed().await;
        Ok(user)
    }

    /// Follow `target`. The target's cached counters take the values the
    /// server committed; the caller's own profile is refetched on next read.
    pub async fn follow(&self, target: Uuid) -> Result<FollowResponse> {
        let response = self.client.follow(target).await?;
        self.after_follow_change(target, response).await?;
        Ok(response)
    }

    pub async fn unfollow(&self, target: Uuid) -> Result<FollowResponse> {
        let response = self.client.unfollow(target).await?;
        self.after_follow_change(target, response).await?;
        Ok(response)
    }

    pub async fn create_task(&self, req: &CreateTaskRequest) -> Result<Task> {
        let task = self.client.create_task(req).await?;
        self.invalidate_tasks(task.user_id).await;
        Ok(task)
    }

    pub async fn delete_task(&self, task_id: Uuid) -> Result<()> {
        let me = self.me().await?;
        let result = self.client.delete_task(task_id).await;
        self.invalidate_tasks(me).await;
        result
    }

    pub async fn complete_task(&self, task_id: Uuid, image: Vec<u8>, content_type: &str) -> Result<Post> {
        let post = self.client.complete_task(task_id, image, content_type).await?;
        self.invalidate_tasks(post.user_id).await;
        self.invalidate_profile(post.user_id).await;
        self.invalidate_feed().await;
        Ok(post)
    }

    pub async fn toggle_like(&self, post_id: Uuid) -> Result<LikeResponse> {
        let like = self.client.toggle_like(post_id).await?;
        self.invalidate_feed().await;
        Ok(like)
    }

    pub async fn add_comment(&self, post_id: Uuid, text: &str) -> Result<Comment> {
        let comment = self.client.add_comment(post_id, text).await?;
        self.invalidate_feed().await;
        Ok(comment)
    }

    /// Sign out and drop everything cached for the previous user.
    pub async fn sign_out(&self) -> Result<()> {
        let result = self.client.sign_out().await;
        self.clear().await;
        result
    }

    async fn after_follow_change(&self, target: Uuid, response: FollowResponse) -> Result<()> {
        let me = self.me().await?;
        let mut profiles = self.profiles.lock().await;
        profiles.remove(&me);
        if let Some(profile) = profiles.get_mut(&target) {
            profile.follower_count = response.target.follower_count;
            profile.following_count = response.target.following_count;
        }
        Ok(())
    }

    async fn me(&self) -> Result<Uuid> {
        self.client.user_id().await.ok_or(ClientError::NotSignedIn)
    }
}
