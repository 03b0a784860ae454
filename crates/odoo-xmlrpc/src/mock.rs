//! Scripted in-process transport for tests.
//!
//! Replies are queued per method. `execute_kw` calls can additionally be
//! keyed by the inner model method (`execute_kw:read`), which keeps test
//! scripts readable when a scenario mixes several operations.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{RpcError, Service, Value, XmlRpcTransport};

/// One observed call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub service: Service,
    pub method: String,
    pub params: Vec<Value>,
}

impl RecordedCall {
    /// For `execute_kw`: the target model.
    pub fn model(&self) -> Option<&str> {
        self.params.get(3).and_then(Value::as_str)
    }

    /// For `execute_kw`: the inner method name.
    pub fn inner_method(&self) -> Option<&str> {
        self.params.get(4).and_then(Value::as_str)
    }

    /// For `execute_kw`: the positional argument list.
    pub fn args(&self) -> Option<&[Value]> {
        self.params.get(5).and_then(Value::as_array)
    }

    /// For `execute_kw`: the keyword-argument struct.
    pub fn kwargs(&self) -> Option<&std::collections::BTreeMap<String, Value>> {
        self.params.get(6).and_then(Value::as_struct)
    }
}

/// Scripted transport replaying queued replies.
#[derive(Default)]
pub struct MockTransport {
    calls: Mutex<Vec<RecordedCall>>,
    replies: Mutex<HashMap<String, VecDeque<Result<Value, RpcError>>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for a method key.
    ///
    /// Keys are either a bare method (`"version"`, `"authenticate"`) or
    /// `execute_kw:{inner}` (`"execute_kw:search_read"`). A queued reply is
    /// consumed by exactly one call.
    pub fn expect(&self, key: &str, reply: Result<Value, RpcError>) {
        self.replies
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Every call observed so far.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Count calls matching a key (same keying as [`expect`](Self::expect)).
    pub fn call_count(&self, key: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| {
                call.method == key
                    || call
                        .inner_method()
                        .is_some_and(|inner| key == format!("execute_kw:{inner}"))
            })
            .count()
    }
}

#[async_trait]
impl XmlRpcTransport for MockTransport {
    async fn call(
        &self,
        service: Service,
        method: &str,
        params: Vec<Value>,
    ) -> Result<Value, RpcError> {
        let call = RecordedCall {
            service,
            method: method.to_string(),
            params,
        };

        let specific_key = call
            .inner_method()
            .filter(|_| method == "execute_kw")
            .map(|inner| format!("execute_kw:{inner}"));

        self.calls.lock().unwrap().push(call);

        let mut replies = self.replies.lock().unwrap();
        let reply = specific_key
            .and_then(|key| replies.get_mut(&key).and_then(VecDeque::pop_front))
            .or_else(|| replies.get_mut(method).and_then(VecDeque::pop_front));

        reply.unwrap_or_else(|| {
            Err(RpcError::Decode(format!(
                "mock transport has no reply queued for '{method}'"
            )))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_in_order_and_records() {
        let mock = MockTransport::new();
        mock.expect("version", Ok(Value::String("ok".into())));

        let out = mock.call(Service::Common, "version", vec![]).await.unwrap();
        assert_eq!(out, Value::String("ok".into()));
        assert_eq!(mock.call_count("version"), 1);
    }

    #[tokio::test]
    async fn keys_execute_kw_by_inner_method() {
        let mock = MockTransport::new();
        mock.expect("execute_kw:search", Ok(Value::Array(vec![Value::Int(1)])));

        let params = vec![
            Value::from("db"),
            Value::Int(2),
            Value::from("pwd"),
            Value::from("res.partner"),
            Value::from("search"),
            Value::Array(vec![]),
            Value::Struct(Default::default()),
        ];
        let out = mock
            .call(Service::Object, "execute_kw", params)
            .await
            .unwrap();
        assert_eq!(out, Value::Array(vec![Value::Int(1)]));
        assert_eq!(mock.call_count("execute_kw:search"), 1);
    }

    #[tokio::test]
    async fn unqueued_call_errors() {
        let mock = MockTransport::new();
        let err = mock.call(Service::Db, "list", vec![]).await.unwrap_err();
        assert!(matches!(err, RpcError::Decode(_)));
    }
}
