use kernel::model::{
    id::{ReservationId, TryoutId, UserId},
    reservation::{Reservation, ReservationStatus},
};
use shared::error::AppError;
use uuid::Uuid;

// status は TEXT で保持し、ドメイン型への変換時に検証する
#[derive(sqlx::FromRow)]
pub struct ReservationRow {
    pub id: i64,
    pub user_id: Uuid,
    pub tryout_id: i64,
    pub reserved_seats: i32,
    pub status: String,
}

impl TryFrom<ReservationRow> for Reservation {
    type Error = AppError;

    fn try_from(value: ReservationRow) -> Result<Self, Self::Error> {
        let ReservationRow {
            id,
            user_id,
            tryout_id,
            reserved_seats,
            status,
        } = value;
        Ok(Reservation {
            id: ReservationId::new(id),
            user_id: UserId::from(user_id),
            tryout_id: TryoutId::new(tryout_id),
            reserved_seats,
            status: status.parse::<ReservationStatus>()?,
        })
    }
}
