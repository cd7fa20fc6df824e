use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use derive_new::new;
use kernel::model::{
    id::{ReservationId, TryoutId},
    list::PaginatedList,
    reservation::{
        event::{ReserveTryout, UpdateReservedSeats},
        Reservation, ReservationStatus,
    },
    tryout::Tryout,
    user::User,
};
use kernel::repository::reservation::ReservationRepository;
use kernel::rules;
use shared::error::{AppError, AppResult};
use sqlx::{postgres::PgExecutor, PgConnection};
use uuid::Uuid;

use crate::database::{model::reservation::ReservationRow, ConnectionPool};
use crate::repository::tryout::{fetch_tryout_for_update, update_confirmed_count};

const RESERVATION_COLUMNS: &str = "id, user_id, tryout_id, reserved_seats, status";

// ---- 行レベルの読み書き（予約ストア） ----

pub(crate) async fn fetch_reservation(
    executor: impl PgExecutor<'_>,
    reservation_id: i64,
) -> AppResult<Option<ReservationRow>> {
    sqlx::query_as::<_, ReservationRow>(&format!(
        "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1"
    ))
    .bind(reservation_id)
    .fetch_optional(executor)
    .await
    .map_err(AppError::SpecificOperationError)
}

pub(crate) async fn fetch_reservation_for_update(
    conn: &mut PgConnection,
    reservation_id: i64,
) -> AppResult<Option<ReservationRow>> {
    sqlx::query_as::<_, ReservationRow>(&format!(
        "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1 FOR UPDATE"
    ))
    .bind(reservation_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(AppError::SpecificOperationError)
}

// (user_id, tryout_id) はステータスを問わず一意。削除済みの行も返す
pub(crate) async fn fetch_user_tryout_reservation_for_update(
    conn: &mut PgConnection,
    user_id: Uuid,
    tryout_id: i64,
) -> AppResult<Option<ReservationRow>> {
    sqlx::query_as::<_, ReservationRow>(&format!(
        "SELECT {RESERVATION_COLUMNS} FROM reservations \
         WHERE user_id = $1 AND tryout_id = $2 FOR UPDATE"
    ))
    .bind(user_id)
    .bind(tryout_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(AppError::SpecificOperationError)
}

/// 指定した試験 id のうち、ユーザーが有効な（deleted でない）予約を
/// 持っているものの集合を返す
pub(crate) async fn reserved_tryout_ids(
    executor: impl PgExecutor<'_>,
    user_id: Uuid,
    tryout_ids: &[i64],
) -> AppResult<HashSet<TryoutId>> {
    let ids = sqlx::query_scalar::<_, i64>(
        "SELECT tryout_id FROM reservations \
         WHERE user_id = $1 AND tryout_id = ANY($2) AND status != 'deleted'",
    )
    .bind(user_id)
    .bind(tryout_ids)
    .fetch_all(executor)
    .await
    .map_err(AppError::SpecificOperationError)?;

    Ok(ids.into_iter().map(TryoutId::new).collect())
}

// 重複条件: existing.start < new.end AND new.start < existing.end
//
// 同一ユーザーが時間帯の重なる別々の試験を同時に申請すると、
// ロックされるのは互いに別の試験行なので、相手の未コミットの
// pending 行はこのクエリからは見えず、両方ともコミットされ得る。
// 行ロックで守る対象は試験ごとの定員カウンタのみで、
// ユーザー横断の重複チェックはベストエフォートとして許容している。
pub(crate) async fn has_overlapping_reservation(
    executor: impl PgExecutor<'_>,
    user_id: Uuid,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
) -> AppResult<bool> {
    let overlap = sqlx::query_scalar::<_, i64>(
        "SELECT r.id FROM reservations AS r \
         INNER JOIN tryouts AS t ON r.tryout_id = t.id \
         WHERE r.user_id = $1 \
           AND r.status != 'deleted' \
           AND t.start_time < $3 \
           AND $2 < t.end_time \
         LIMIT 1",
    )
    .bind(user_id)
    .bind(start_time)
    .bind(end_time)
    .fetch_optional(executor)
    .await
    .map_err(AppError::SpecificOperationError)?;

    Ok(overlap.is_some())
}

async fn insert_reservation(
    conn: &mut PgConnection,
    user_id: Uuid,
    tryout_id: i64,
    reserved_seats: i32,
) -> AppResult<ReservationRow> {
    sqlx::query_as::<_, ReservationRow>(&format!(
        "INSERT INTO reservations (user_id, tryout_id, reserved_seats, status) \
         VALUES ($1, $2, $3, 'pending') \
         RETURNING {RESERVATION_COLUMNS}"
    ))
    .bind(user_id)
    .bind(tryout_id)
    .bind(reserved_seats)
    .fetch_one(&mut *conn)
    .await
    .map_err(AppError::SpecificOperationError)
}

async fn update_reservation_row(
    conn: &mut PgConnection,
    reservation_id: i64,
    reserved_seats: i32,
    status: ReservationStatus,
) -> AppResult<()> {
    let res = sqlx::query(
        "UPDATE reservations SET reserved_seats = $2, status = $3 WHERE id = $1",
    )
    .bind(reservation_id)
    .bind(reserved_seats)
    .bind(status.as_str())
    .execute(&mut *conn)
    .await
    .map_err(AppError::SpecificOperationError)?;

    if res.rows_affected() < 1 {
        return Err(AppError::NoRowsAffectedError(
            "No reservation record has been updated".into(),
        ));
    }

    Ok(())
}

/// 予約と試験の両方の行ロックを取得して読み直す。
///
/// グローバルなロック順序は tryouts → reservations で統一している。
/// 予約 id から試験 id を知る必要があるため、先に素の読み取りで
/// 試験 id を特定してから、順序どおりにロックを取る。
/// 検証に使うのはロック取得後に読み直した値のみ。
async fn lock_reservation_and_tryout(
    conn: &mut PgConnection,
    reservation_id: ReservationId,
) -> AppResult<(Reservation, Tryout)> {
    let Some(probe) = fetch_reservation(&mut *conn, reservation_id.raw()).await? else {
        return Err(AppError::EntityNotFound(format!(
            "予約（{reservation_id}）が見つかりませんでした。"
        )));
    };

    let Some(tryout_row) = fetch_tryout_for_update(&mut *conn, probe.tryout_id).await? else {
        return Err(AppError::EntityNotFound(format!(
            "試験（{}）が見つかりませんでした。",
            probe.tryout_id
        )));
    };

    let Some(reservation_row) =
        fetch_reservation_for_update(&mut *conn, reservation_id.raw()).await?
    else {
        return Err(AppError::EntityNotFound(format!(
            "予約（{reservation_id}）が見つかりませんでした。"
        )));
    };

    Ok((
        Reservation::try_from(reservation_row)?,
        Tryout::from(tryout_row),
    ))
}

// ---- オーケストレーター ----

#[derive(new)]
pub struct ReservationRepositoryImpl {
    db: ConnectionPool,
}

#[async_trait]
impl ReservationRepository for ReservationRepositoryImpl {
    // 試験を申請する
    async fn reserve(&self, actor: &User, event: ReserveTryout) -> AppResult<Reservation> {
        if actor.is_superuser {
            return Err(AppError::ForbiddenOperation(
                "管理者は試験を申請できません。".into(),
            ));
        }

        let mut uow = self.db.begin().await?;
        let conn = uow.conn();

        // ① 試験の行ロックを取得（ロック順序: tryouts → reservations）
        let Some(tryout_row) = fetch_tryout_for_update(&mut *conn, event.tryout_id.raw()).await?
        else {
            return Err(AppError::EntityNotFound(format!(
                "試験（{}）が見つかりませんでした。",
                event.tryout_id
            )));
        };
        let tryout = Tryout::from(tryout_row);

        // ② ロック下で検証入力を揃えてルールを評価する
        let reserved =
            reserved_tryout_ids(&mut *conn, actor.id.raw(), &[tryout.id.raw()]).await?;
        let overlapping = has_overlapping_reservation(
            &mut *conn,
            actor.id.raw(),
            tryout.start_time,
            tryout.end_time,
        )
        .await?;
        rules::validate_new_reservation(
            &tryout,
            event.reserved_seats,
            Utc::now(),
            &reserved,
            overlapping,
        )?;

        // ③ 過去にキャンセルした行があれば再利用する。
        //    (user_id, tryout_id) の一意制約があるため、同じ組で INSERT はできない
        let existing = fetch_user_tryout_reservation_for_update(
            &mut *conn,
            actor.id.raw(),
            tryout.id.raw(),
        )
        .await?;

        let reservation = match existing {
            Some(row) => {
                let prior = Reservation::try_from(row)?;
                if prior.status != ReservationStatus::Deleted {
                    // 検証済みのため通常は到達しない
                    return Err(AppError::AlreadyReserved(
                        "既に申請済みの試験です。".into(),
                    ));
                }
                update_reservation_row(
                    &mut *conn,
                    prior.id.raw(),
                    event.reserved_seats,
                    ReservationStatus::Pending,
                )
                .await?;
                tracing::info!(
                    reservation_id = %prior.id,
                    tryout_id = %tryout.id,
                    "reactivated a cancelled reservation"
                );
                Reservation {
                    reserved_seats: event.reserved_seats,
                    status: ReservationStatus::Pending,
                    ..prior
                }
            }
            None => {
                let row = insert_reservation(
                    &mut *conn,
                    actor.id.raw(),
                    tryout.id.raw(),
                    event.reserved_seats,
                )
                .await?;
                Reservation::try_from(row)?
            }
        };

        uow.commit().await?;

        tracing::info!(
            reservation_id = %reservation.id,
            tryout_id = %tryout.id,
            reserved_seats = reservation.reserved_seats,
            "reservation created"
        );

        Ok(reservation)
    }

    // 予約を確定する（admin 専用。認可は境界層で済んでいる前提）
    async fn confirm(&self, reservation_id: ReservationId) -> AppResult<Reservation> {
        let mut uow = self.db.begin().await?;
        let conn = uow.conn();

        let (reservation, tryout) = lock_reservation_and_tryout(conn, reservation_id).await?;

        rules::validate_confirm(&reservation, &tryout, Utc::now())?;

        // 座席数の加算とステータス遷移は同一トランザクションで行う
        let new_count = tryout.confirmed_reserved_count + reservation.reserved_seats;
        update_confirmed_count(&mut *conn, tryout.id.raw(), new_count).await?;
        update_reservation_row(
            &mut *conn,
            reservation.id.raw(),
            reservation.reserved_seats,
            ReservationStatus::Confirmed,
        )
        .await?;

        uow.commit().await?;

        tracing::info!(
            reservation_id = %reservation.id,
            tryout_id = %tryout.id,
            confirmed_reserved_count = new_count,
            "reservation confirmed"
        );

        Ok(Reservation {
            status: ReservationStatus::Confirmed,
            ..reservation
        })
    }

    // 予約を削除（キャンセル）する
    async fn delete(&self, actor: &User, reservation_id: ReservationId) -> AppResult<Reservation> {
        let mut uow = self.db.begin().await?;
        let conn = uow.conn();

        let (reservation, tryout) = lock_reservation_and_tryout(conn, reservation_id).await?;

        rules::validate_delete(actor, &reservation, &tryout, Utc::now())?;

        // 確定済みを削除する場合のみ座席数を返却する
        if reservation.status == ReservationStatus::Confirmed {
            let new_count = tryout.confirmed_reserved_count - reservation.reserved_seats;
            update_confirmed_count(&mut *conn, tryout.id.raw(), new_count).await?;
        }
        update_reservation_row(
            &mut *conn,
            reservation.id.raw(),
            reservation.reserved_seats,
            ReservationStatus::Deleted,
        )
        .await?;

        uow.commit().await?;

        tracing::info!(
            reservation_id = %reservation.id,
            tryout_id = %tryout.id,
            was_confirmed = (reservation.status == ReservationStatus::Confirmed),
            "reservation deleted"
        );

        Ok(Reservation {
            status: ReservationStatus::Deleted,
            ..reservation
        })
    }

    // 予約座席数を変更する
    async fn update_seats(
        &self,
        actor: &User,
        event: UpdateReservedSeats,
    ) -> AppResult<Reservation> {
        let mut uow = self.db.begin().await?;
        let conn = uow.conn();

        let (reservation, tryout) =
            lock_reservation_and_tryout(conn, event.reservation_id).await?;

        rules::validate_update_seats(
            actor,
            &reservation,
            &tryout,
            event.reserved_seats,
            Utc::now(),
        )?;

        // 確定済みの予約は座席差分をカウンタへ反映する
        if reservation.status == ReservationStatus::Confirmed {
            let delta = event.reserved_seats - reservation.reserved_seats;
            let new_count = tryout.confirmed_reserved_count + delta;
            update_confirmed_count(&mut *conn, tryout.id.raw(), new_count).await?;
        }
        update_reservation_row(
            &mut *conn,
            reservation.id.raw(),
            event.reserved_seats,
            reservation.status,
        )
        .await?;

        uow.commit().await?;

        tracing::info!(
            reservation_id = %reservation.id,
            tryout_id = %tryout.id,
            reserved_seats = event.reserved_seats,
            "reservation seats updated"
        );

        Ok(Reservation {
            reserved_seats: event.reserved_seats,
            ..reservation
        })
    }

    // 予約の詳細を取得する（ロックなしの読み取り）
    async fn find_by_id(
        &self,
        actor: &User,
        reservation_id: ReservationId,
    ) -> AppResult<Reservation> {
        let Some(row) = fetch_reservation(self.db.inner_ref(), reservation_id.raw()).await?
        else {
            return Err(AppError::EntityNotFound(format!(
                "予約（{reservation_id}）が見つかりませんでした。"
            )));
        };
        let reservation = Reservation::try_from(row)?;

        if !actor.is_superuser && reservation.user_id != actor.id {
            return Err(AppError::ForbiddenOperation(
                "本人の予約のみ参照できます。".into(),
            ));
        }

        Ok(reservation)
    }

    // 予約一覧を取得する。一般ユーザーは本人分のみ、admin は全件
    async fn paginate(
        &self,
        actor: &User,
        limit: i64,
        offset: i64,
    ) -> AppResult<PaginatedList<Reservation>> {
        let (total, rows) = if actor.is_superuser {
            let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM reservations")
                .fetch_one(self.db.inner_ref())
                .await
                .map_err(AppError::SpecificOperationError)?;
            let rows = sqlx::query_as::<_, ReservationRow>(&format!(
                "SELECT {RESERVATION_COLUMNS} FROM reservations \
                 ORDER BY id LIMIT $1 OFFSET $2"
            ))
            .bind(limit)
            .bind(offset)
            .fetch_all(self.db.inner_ref())
            .await
            .map_err(AppError::SpecificOperationError)?;
            (total, rows)
        } else {
            let total = sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM reservations WHERE user_id = $1",
            )
            .bind(actor.id.raw())
            .fetch_one(self.db.inner_ref())
            .await
            .map_err(AppError::SpecificOperationError)?;
            let rows = sqlx::query_as::<_, ReservationRow>(&format!(
                "SELECT {RESERVATION_COLUMNS} FROM reservations \
                 WHERE user_id = $1 ORDER BY id LIMIT $2 OFFSET $3"
            ))
            .bind(actor.id.raw())
            .bind(limit)
            .bind(offset)
            .fetch_all(self.db.inner_ref())
            .await
            .map_err(AppError::SpecificOperationError)?;
            (total, rows)
        };

        let items = rows
            .into_iter()
            .map(Reservation::try_from)
            .collect::<AppResult<Vec<_>>>()?;

        Ok(PaginatedList { total, items })
    }
}
