//! Declarative checks over an [`ApiResponse`]
//!
//! Every rule runs, failures are collected with [`SoftAssertions`], and the
//! caller gets one error listing all of them.

use serde_json::Value;
use std::time::Duration;
use testbed_common::SoftAssertions;

use crate::api::ApiResponse;
use crate::error::{E2eError, E2eResult};

#[derive(Debug, Clone)]
enum Rule {
    Status(u16),
    Success,
    Header { name: String, value: Option<String> },
    ContentType(String),
    HasFields(Vec<String>),
    FieldEq { pointer: String, expected: Value },
    MaxDuration(Duration),
}

/// Builder of response checks
#[derive(Debug, Clone, Default)]
pub struct ResponseValidator {
    rules: Vec<Rule>,
}

impl ResponseValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: u16) -> Self {
        self.rules.push(Rule::Status(status));
        self
    }

    /// Any 2xx status
    pub fn success(mut self) -> Self {
        self.rules.push(Rule::Success);
        self
    }

    /// Header is present, and equals `value` when given
    pub fn header(mut self, name: &str, value: Option<&str>) -> Self {
        self.rules.push(Rule::Header {
            name: name.to_string(),
            value: value.map(str::to_string),
        });
        self
    }

    /// `content-type` starts with `mime`
    pub fn content_type(mut self, mime: &str) -> Self {
        self.rules.push(Rule::ContentType(mime.to_string()));
        self
    }

    /// Top-level JSON object (or every element of a top-level array) has these keys
    pub fn has_fields(mut self, fields: &[&str]) -> Self {
        self.rules
            .push(Rule::HasFields(fields.iter().map(|f| f.to_string()).collect()));
        self
    }

    /// Value at a JSON pointer (`/address/city`) equals `expected`
    pub fn field_eq(mut self, pointer: &str, expected: Value) -> Self {
        self.rules.push(Rule::FieldEq {
            pointer: pointer.to_string(),
            expected,
        });
        self
    }

    pub fn max_duration(mut self, limit: Duration) -> Self {
        self.rules.push(Rule::MaxDuration(limit));
        self
    }

    pub fn validate(&self, response: &ApiResponse) -> E2eResult<()> {
        let mut soft = SoftAssertions::new(format!("{} {}", response.method, response.url));
        let needs_json = self
            .rules
            .iter()
            .any(|r| matches!(r, Rule::HasFields(_) | Rule::FieldEq { .. }));
        let body = if needs_json {
            soft.capture(response.json_value())
        } else {
            None
        };

        for rule in &self.rules {
            match rule {
                Rule::Status(expected) => {
                    soft.eq("status", response.status, *expected);
                }
                Rule::Success => {
                    soft.check(
                        response.is_success(),
                        format!("expected a 2xx status, got {}", response.status),
                    );
                }
                Rule::Header { name, value } => match (response.header(name), value) {
                    (None, _) => soft.fail(format!("missing header '{}'", name)),
                    (Some(actual), Some(expected)) => {
                        soft.eq(&format!("header '{}'", name), actual, expected.as_str());
                    }
                    (Some(_), None) => {}
                },
                Rule::ContentType(mime) => {
                    let actual = response.header("content-type").unwrap_or("");
                    soft.check(
                        actual.starts_with(mime.as_str()),
                        format!("expected content-type {}, got '{}'", mime, actual),
                    );
                }
                Rule::HasFields(fields) => {
                    if let Some(body) = &body {
                        check_fields(&mut soft, body, fields);
                    }
                }
                Rule::FieldEq { pointer, expected } => {
                    if let Some(body) = &body {
                        match body.pointer(pointer) {
                            Some(actual) => {
                                soft.eq(pointer, actual, expected);
                            }
                            None => soft.fail(format!("no value at '{}'", pointer)),
                        }
                    }
                }
                Rule::MaxDuration(limit) => {
                    soft.check(
                        response.elapsed <= *limit,
                        format!(
                            "response took {} ms, limit {} ms",
                            response.elapsed.as_millis(),
                            limit.as_millis()
                        ),
                    );
                }
            }
        }

        soft.finish().map_err(|e| E2eError::Validation(e.to_string()))
    }
}

fn check_fields(soft: &mut SoftAssertions, body: &Value, fields: &[String]) {
    match body {
        Value::Object(map) => {
            for field in fields {
                soft.check(map.contains_key(field), format!("missing field '{}'", field));
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                match item.as_object() {
                    Some(map) => {
                        for field in fields {
                            soft.check(
                                map.contains_key(field),
                                format!("item {}: missing field '{}'", i, field),
                            );
                        }
                    }
                    None => soft.fail(format!("item {} is not an object", i)),
                }
            }
        }
        other => soft.fail(format!("expected an object or array body, got {}", other)),
    }
}
