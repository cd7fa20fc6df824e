pub mod reservation;
pub mod tryout;
