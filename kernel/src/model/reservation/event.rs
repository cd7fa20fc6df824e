use derive_new::new;

use crate::model::id::{ReservationId, TryoutId};

#[derive(new, Debug)]
pub struct ReserveTryout {
    pub tryout_id: TryoutId,
    pub reserved_seats: i32,
}

#[derive(new, Debug)]
pub struct UpdateReservedSeats {
    pub reservation_id: ReservationId,
    pub reserved_seats: i32,
}
