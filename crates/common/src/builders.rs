//! Test data builders
//!
//! `new()` gives stable, readable defaults for assertions; `random()` gives
//! unique data for tests that create server-side records.

use rand::distributions::Alphanumeric;
use rand::Rng;
use uuid::Uuid;

use crate::types::{Address, Comment, Post, User};

/// Random alphanumeric string of `len` characters
pub fn random_alphanumeric(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Email address that will not collide with earlier runs
pub fn unique_email(prefix: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{}+{}@example.test", prefix, &id[..12])
}

/// Name suffixed with the current time, for records a human may inspect
pub fn timestamped(name: &str) -> String {
    format!("{}-{}", name, chrono::Utc::now().format("%Y%m%d%H%M%S%3f"))
}

#[derive(Debug, Clone)]
pub struct UserBuilder {
    user: User,
}

impl Default for UserBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl UserBuilder {
    pub fn new() -> Self {
        Self {
            user: User {
                id: None,
                name: "Test User".to_string(),
                username: "test.user".to_string(),
                email: "test.user@example.test".to_string(),
                phone: None,
                address: None,
            },
        }
    }

    pub fn random() -> Self {
        let handle = random_alphanumeric(8).to_lowercase();
        Self::new()
            .name(format!("User {}", handle))
            .username(format!("user.{}", handle))
            .email(unique_email(&handle))
            .phone(format!("555-{:04}", rand::thread_rng().gen_range(0..10_000)))
    }

    pub fn id(mut self, id: u64) -> Self {
        self.user.id = Some(id);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.user.name = name.into();
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.user.username = username.into();
        self
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.user.email = email.into();
        self
    }

    pub fn phone(mut self, phone: impl Into<String>) -> Self {
        self.user.phone = Some(phone.into());
        self
    }

    pub fn address(mut self, street: &str, city: &str, zipcode: &str) -> Self {
        self.user.address = Some(Address {
            street: street.to_string(),
            city: city.to_string(),
            zipcode: zipcode.to_string(),
        });
        self
    }

    pub fn build(self) -> User {
        self.user
    }
}

#[derive(Debug, Clone)]
pub struct PostBuilder {
    post: Post,
}

impl Default for PostBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PostBuilder {
    pub fn new() -> Self {
        Self {
            post: Post {
                id: None,
                user_id: 1,
                title: "Test post".to_string(),
                body: "Test post body".to_string(),
            },
        }
    }

    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        Self::new()
            .user_id(rng.gen_range(1..=10))
            .title(format!("Post {}", random_alphanumeric(10)))
            .body(format!("Body {}", random_alphanumeric(40)))
    }

    pub fn id(mut self, id: u64) -> Self {
        self.post.id = Some(id);
        self
    }

    pub fn user_id(mut self, user_id: u64) -> Self {
        self.post.user_id = user_id;
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.post.title = title.into();
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.post.body = body.into();
        self
    }

    pub fn build(self) -> Post {
        self.post
    }
}

#[derive(Debug, Clone)]
pub struct CommentBuilder {
    comment: Comment,
}

impl CommentBuilder {
    pub fn for_post(post_id: u64) -> Self {
        Self {
            comment: Comment {
                id: None,
                post_id,
                name: "Test comment".to_string(),
                email: "commenter@example.test".to_string(),
                body: "Test comment body".to_string(),
            },
        }
    }

    pub fn random(post_id: u64) -> Self {
        let handle = random_alphanumeric(6).to_lowercase();
        Self::for_post(post_id)
            .name(format!("Comment {}", handle))
            .email(unique_email(&handle))
            .body(random_alphanumeric(30))
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.comment.name = name.into();
        self
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.comment.email = email.into();
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.comment.body = body.into();
        self
    }

    pub fn build(self) -> Comment {
        self.comment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_defaults_and_overrides() {
        let user = UserBuilder::new()
            .id(9)
            .name("Ada")
            .address("1 Main St", "Springfield", "12345")
            .build();
        assert_eq!(user.id, Some(9));
        assert_eq!(user.name, "Ada");
        assert_eq!(user.username, "test.user");
        assert_eq!(user.address.unwrap().zipcode, "12345");
    }

    #[test]
    fn test_random_users_are_unique() {
        let a = UserBuilder::random().build();
        let b = UserBuilder::random().build();
        assert_ne!(a.email, b.email);
        assert_ne!(a.username, b.username);
        assert!(a.email.ends_with("@example.test"));
    }

    #[test]
    fn test_random_post_stays_in_range() {
        let post = PostBuilder::random().build();
        assert!((1..=10).contains(&post.user_id));
        assert!(post.title.starts_with("Post "));
        assert!(post.id.is_none());
    }

    #[test]
    fn test_comment_keeps_post_id() {
        let comment = CommentBuilder::random(42).build();
        assert_eq!(comment.post_id, 42);
        assert_eq!(comment.body.len(), 30);
    }

    #[test]
    fn test_random_alphanumeric_length() {
        let s = random_alphanumeric(16);
        assert_eq!(s.len(), 16);
        assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(timestamped("report").starts_with("report-"));
    }
}
