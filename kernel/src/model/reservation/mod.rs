use std::fmt;
use std::str::FromStr;

use shared::error::{AppError, AppResult};

use crate::model::id::{ReservationId, TryoutId, UserId};

pub mod event;

/// ユーザーによる試験座席の申し込み。物理削除はせず、
/// キャンセルは status を deleted に遷移させることで表現する。
#[derive(Debug, Clone)]
pub struct Reservation {
    pub id: ReservationId,
    pub user_id: UserId,
    pub tryout_id: TryoutId,
    pub reserved_seats: i32,
    pub status: ReservationStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Deleted,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Deleted => "deleted",
        }
    }

    /// 予約ステータスの遷移表。許可される遷移は以下のみ。
    ///   pending   → confirmed
    ///   pending   → deleted
    ///   confirmed → deleted（管理者のみ）
    /// deleted → pending の復活は再申請の副作用としてオーケストレーター側で
    /// 行われるため、この表は通過しない。
    pub fn ensure_transition(
        from: Self,
        to: Self,
        actor_is_admin: bool,
    ) -> AppResult<()> {
        match (from, to) {
            (Self::Pending, Self::Confirmed) | (Self::Pending, Self::Deleted) => Ok(()),
            (Self::Confirmed, Self::Deleted) if actor_is_admin => Ok(()),
            (Self::Confirmed, Self::Deleted) => Err(AppError::UnprocessableEntity(
                "確定済みの予約は管理者のみ削除できます。".into(),
            )),
            (Self::Deleted, _) => Err(AppError::UnprocessableEntity(
                "既に削除済みの予約です。".into(),
            )),
            (from, to) => Err(AppError::UnprocessableEntity(format!(
                "予約の状態を {from} から {to} に変更することはできません。"
            ))),
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "deleted" => Ok(Self::Deleted),
            other => Err(AppError::ConversionEntityError(format!(
                "不明な予約ステータスです: {other}"
            ))),
        }
    }
}
