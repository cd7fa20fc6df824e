use chrono::{DateTime, Utc};

use crate::model::id::TryoutId;

/// 定員と時間枠をもつ試験の 1 開催分。
/// confirmed_reserved_count は確定済み予約の座席数合計で、
/// コミット後は常に max_capacity 以下でなければならない。
#[derive(Debug, Clone)]
pub struct Tryout {
    pub id: TryoutId,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub registration_start_time: DateTime<Utc>,
    pub registration_end_time: DateTime<Utc>,
    pub max_capacity: i32,
    pub confirmed_reserved_count: i32,
}

impl Tryout {
    /// 確定済み座席を差し引いた残り定員
    pub fn remaining_capacity(&self) -> i32 {
        self.max_capacity - self.confirmed_reserved_count
    }
}

/// 一覧・詳細の読み取り用。ユーザーが有効な予約を持つかどうかを付与する
#[derive(Debug, Clone)]
pub struct TryoutListing {
    pub tryout: Tryout,
    pub is_applied: bool,
}
