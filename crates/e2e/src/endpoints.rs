//! Endpoint wrappers over [`ApiClient`]
//!
//! Each wrapper asserts the status the endpoint is documented to return
//! and decodes the body into the shared models.

use testbed_common::{AuthToken, Comment, Credentials, Post, User};

use crate::api::{ApiClient, RequestOptions};
use crate::error::E2eResult;

/// `/users`
pub struct UsersApi<'a> {
    client: &'a ApiClient,
}

impl<'a> UsersApi<'a> {
    pub fn new(client: &'a ApiClient) -> Self {
        Self { client }
    }

    pub async fn list(&self) -> E2eResult<Vec<User>> {
        self.client
            .get("/users", RequestOptions::new())
            .await?
            .expect_status(200)?
            .json()
    }

    pub async fn get(&self, id: u64) -> E2eResult<User> {
        self.client
            .get(&format!("/users/{}", id), RequestOptions::new())
            .await?
            .expect_status(200)?
            .json()
    }

    pub async fn create(&self, user: &User) -> E2eResult<User> {
        self.client
            .post("/users", RequestOptions::new().json(user)?)
            .await?
            .expect_status(201)?
            .json()
    }

    pub async fn update(&self, id: u64, user: &User) -> E2eResult<User> {
        self.client
            .put(&format!("/users/{}", id), RequestOptions::new().json(user)?)
            .await?
            .expect_status(200)?
            .json()
    }

    /// Partial update with an arbitrary JSON patch body
    pub async fn patch(&self, id: u64, changes: &serde_json::Value) -> E2eResult<User> {
        self.client
            .patch(&format!("/users/{}", id), RequestOptions::new().json(changes)?)
            .await?
            .expect_status(200)?
            .json()
    }

    pub async fn delete(&self, id: u64) -> E2eResult<()> {
        self.client
            .delete(&format!("/users/{}", id), RequestOptions::new())
            .await?
            .expect_status(200)?;
        Ok(())
    }
}

/// `/posts`
pub struct PostsApi<'a> {
    client: &'a ApiClient,
}

impl<'a> PostsApi<'a> {
    pub fn new(client: &'a ApiClient) -> Self {
        Self { client }
    }

    pub async fn list(&self) -> E2eResult<Vec<Post>> {
        self.client
            .get("/posts", RequestOptions::new())
            .await?
            .expect_status(200)?
            .json()
    }

    pub async fn list_for_user(&self, user_id: u64) -> E2eResult<Vec<Post>> {
        self.client
            .get("/posts", RequestOptions::new().query("userId", user_id))
            .await?
            .expect_status(200)?
            .json()
    }

    pub async fn get(&self, id: u64) -> E2eResult<Post> {
        self.client
            .get(&format!("/posts/{}", id), RequestOptions::new())
            .await?
            .expect_status(200)?
            .json()
    }

    pub async fn create(&self, post: &Post) -> E2eResult<Post> {
        self.client
            .post("/posts", RequestOptions::new().json(post)?)
            .await?
            .expect_status(201)?
            .json()
    }

    pub async fn update(&self, id: u64, post: &Post) -> E2eResult<Post> {
        self.client
            .put(&format!("/posts/{}", id), RequestOptions::new().json(post)?)
            .await?
            .expect_status(200)?
            .json()
    }

    pub async fn delete(&self, id: u64) -> E2eResult<()> {
        self.client
            .delete(&format!("/posts/{}", id), RequestOptions::new())
            .await?
            .expect_status(200)?;
        Ok(())
    }

    pub async fn comments(&self, post_id: u64) -> E2eResult<Vec<Comment>> {
        self.client
            .get(&format!("/posts/{}/comments", post_id), RequestOptions::new())
            .await?
            .expect_status(200)?
            .json()
    }
}

/// `/auth`
pub struct AuthApi<'a> {
    client: &'a ApiClient,
}

impl<'a> AuthApi<'a> {
    pub fn new(client: &'a ApiClient) -> Self {
        Self { client }
    }

    pub async fn login(&self, credentials: &Credentials) -> E2eResult<AuthToken> {
        self.client
            .post("/auth/login", RequestOptions::new().json(credentials)?)
            .await?
            .expect_status(200)?
            .json()
    }

    /// Log in and return a client that sends the issued token
    pub async fn authenticated_client(&self, credentials: &Credentials) -> E2eResult<ApiClient> {
        let token = self.login(credentials).await?;
        Ok(self.client.with_bearer_token(token.token))
    }
}
