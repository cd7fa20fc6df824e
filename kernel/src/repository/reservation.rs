use async_trait::async_trait;
use shared::error::AppResult;

use crate::model::{
    id::ReservationId,
    list::PaginatedList,
    reservation::{
        event::{ReserveTryout, UpdateReservedSeats},
        Reservation,
    },
    user::User,
};

#[async_trait]
pub trait ReservationRepository: Send + Sync {
    // 試験を申請する。過去にキャンセルした予約があれば同じ行を pending に戻す
    async fn reserve(&self, actor: &User, event: ReserveTryout) -> AppResult<Reservation>;
    // 予約を確定し、試験の確定予約数に座席数を加算する（admin 専用）
    async fn confirm(&self, reservation_id: ReservationId) -> AppResult<Reservation>;
    // 予約を削除（キャンセル）する。確定済みなら確定予約数から座席数を減算する
    async fn delete(&self, actor: &User, reservation_id: ReservationId) -> AppResult<Reservation>;
    // 予約座席数を変更する。確定済みなら差分を確定予約数に反映する
    async fn update_seats(
        &self,
        actor: &User,
        event: UpdateReservedSeats,
    ) -> AppResult<Reservation>;
    // 予約の詳細を取得する。本人または admin のみ参照できる
    async fn find_by_id(&self, actor: &User, reservation_id: ReservationId)
        -> AppResult<Reservation>;
    // 予約一覧を取得する。一般ユーザーは本人分のみ、admin は全件
    async fn paginate(
        &self,
        actor: &User,
        limit: i64,
        offset: i64,
    ) -> AppResult<PaginatedList<Reservation>>;
}
