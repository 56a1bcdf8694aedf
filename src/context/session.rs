//! 会话数据模型
//!
//! Session 持有一次对话的全部轮次与属性，历史仅允许追加；Turn 追加后不可变。
//! 整个结构可序列化，用于 KV 层的跨进程持久化。

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 意图环形缓冲上限：只用于丰富后续分类提示，不参与当前轮判定
const INTENT_HISTORY_CAP: usize = 20;

/// 轮次角色
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// 单轮对话
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// 单个会话
///
/// history 为私有字段：外部只能通过 push_turn 追加，保证提交顺序与追加不变量。
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub owner_id: Option<String>,
    pub language: String,
    history: Vec<Turn>,
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    /// 最近若干轮的 primary_kind（分类器追加），上限 INTENT_HISTORY_CAP
    #[serde(default)]
    recent_intents: VecDeque<String>,
}

impl Session {
    pub fn new(owner_id: Option<String>, language: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: format!("session_{}", uuid::Uuid::new_v4()),
            owner_id,
            language: language.into(),
            history: Vec::new(),
            attributes: HashMap::new(),
            created_at: now,
            last_active: now,
            recent_intents: VecDeque::new(),
        }
    }

    /// 追加一轮对话（唯一的历史写入口）
    pub fn push_turn(&mut self, turn: Turn) {
        self.last_active = Utc::now();
        self.history.push(turn);
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    /// 最近 k 轮（不足 k 时返回全部）
    pub fn recent_turns(&self, k: usize) -> &[Turn] {
        let start = self.history.len().saturating_sub(k);
        &self.history[start..]
    }

    /// 分类器写入的意图历史（环形，超限丢最旧）
    pub fn push_intent(&mut self, kind: impl Into<String>) {
        self.recent_intents.push_back(kind.into());
        while self.recent_intents.len() > INTENT_HISTORY_CAP {
            self.recent_intents.pop_front();
        }
    }

    pub fn recent_intents(&self) -> impl Iterator<Item = &str> {
        self.recent_intents.iter().map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_append_order() {
        let mut session = Session::new(None, "en");
        session.push_turn(Turn::user("first"));
        session.push_turn(Turn::assistant("second"));
        session.push_turn(Turn::user("third"));

        let texts: Vec<_> = session.history().iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_recent_turns_bounded() {
        let mut session = Session::new(None, "en");
        for i in 0..10 {
            session.push_turn(Turn::user(format!("turn {}", i)));
        }
        let recent = session.recent_turns(3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].text, "turn 7");
    }

    #[test]
    fn test_intent_ring_capped() {
        let mut session = Session::new(None, "en");
        for i in 0..30 {
            session.push_intent(format!("kind_{}", i));
        }
        let intents: Vec<_> = session.recent_intents().collect();
        assert_eq!(intents.len(), INTENT_HISTORY_CAP);
        assert_eq!(intents[0], "kind_10");
        assert_eq!(intents[INTENT_HISTORY_CAP - 1], "kind_29");
    }

    #[test]
    fn test_session_roundtrip_serde() {
        let mut session = Session::new(Some("owner-1".to_string()), "zh");
        session.push_turn(Turn::user("你好"));
        session.push_intent("generic");

        let json = serde_json::to_string(&session).unwrap();
        let restored: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.id, session.id);
        assert_eq!(restored.history().len(), 1);
        assert_eq!(restored.recent_intents().count(), 1);
    }
}
