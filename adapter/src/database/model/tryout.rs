use chrono::{DateTime, Utc};
use kernel::model::{id::TryoutId, tryout::Tryout};

#[derive(sqlx::FromRow)]
pub struct TryoutRow {
    pub id: i64,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub registration_start_time: DateTime<Utc>,
    pub registration_end_time: DateTime<Utc>,
    pub max_capacity: i32,
    pub confirmed_reserved_count: i32,
}

impl From<TryoutRow> for Tryout {
    fn from(value: TryoutRow) -> Self {
        let TryoutRow {
            id,
            name,
            start_time,
            end_time,
            registration_start_time,
            registration_end_time,
            max_capacity,
            confirmed_reserved_count,
        } = value;
        Tryout {
            id: TryoutId::new(id),
            name,
            start_time,
            end_time,
            registration_start_time,
            registration_end_time,
            max_capacity,
            confirmed_reserved_count,
        }
    }
}
