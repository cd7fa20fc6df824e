//! 予約の純粋な検証ロジック。
//!
//! ここにある関数は副作用を持たない。呼び出し側（adapter のリポジトリ実装）が
//! 行ロックを取得してから最新のスナップショットを渡すことで、並行実行時の
//! 整合性が成り立つ。ロック前に検証しても意味がないことに注意。

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use shared::error::{AppError, AppResult};

use crate::model::{
    id::TryoutId,
    reservation::{Reservation, ReservationStatus},
    tryout::Tryout,
    user::User,
};

/// 新規予約（申請）の可否を判定する。
///
/// 定員チェックは confirmed_reserved_count に対してのみ行う。
/// pending の予約は定員を消費しない設計であり、定員は確定時に
/// 改めて検証される（validate_confirm を参照）。
pub fn validate_new_reservation(
    tryout: &Tryout,
    requested_seats: i32,
    now: DateTime<Utc>,
    reserved_tryout_ids: &HashSet<TryoutId>,
    has_overlapping: bool,
) -> AppResult<()> {
    // 申請期間は両端を含む
    if !(tryout.registration_start_time <= now && now <= tryout.registration_end_time) {
        return Err(AppError::InvalidReservationPeriod(
            "申請期間ではありません。".into(),
        ));
    }

    if reserved_tryout_ids.contains(&tryout.id) {
        return Err(AppError::AlreadyReserved("既に申請済みの試験です。".into()));
    }

    if has_overlapping {
        return Err(AppError::AlreadyReserved(
            "同時間帯に既に申請済みの試験が存在します。".into(),
        ));
    }

    if requested_seats > tryout.remaining_capacity() {
        return Err(AppError::TryoutFull(
            "定員を超えているため申請できません。".into(),
        ));
    }

    Ok(())
}

/// 予約確定（admin 専用操作）の可否を判定する。
pub fn validate_confirm(
    reservation: &Reservation,
    tryout: &Tryout,
    now: DateTime<Utc>,
) -> AppResult<()> {
    ReservationStatus::ensure_transition(
        reservation.status,
        ReservationStatus::Confirmed,
        true,
    )?;

    if tryout.start_time <= now {
        return Err(AppError::UnprocessableEntity(
            "試験開始後は予約を確定できません。".into(),
        ));
    }

    if reservation.reserved_seats > tryout.remaining_capacity() {
        return Err(AppError::TryoutFull(
            "定員を超えているため確定できません。".into(),
        ));
    }

    Ok(())
}

/// 予約削除（キャンセル）の可否を判定する。
pub fn validate_delete(
    actor: &User,
    reservation: &Reservation,
    tryout: &Tryout,
    now: DateTime<Utc>,
) -> AppResult<()> {
    if !actor.is_superuser && reservation.user_id != actor.id {
        return Err(AppError::ForbiddenOperation(
            "本人の予約のみ削除できます。".into(),
        ));
    }

    ReservationStatus::ensure_transition(
        reservation.status,
        ReservationStatus::Deleted,
        actor.is_superuser,
    )?;

    if tryout.start_time <= now {
        return Err(AppError::UnprocessableEntity(
            "試験開始後は予約を削除できません。".into(),
        ));
    }

    // カウンタ破損の防衛チェック。確定済み予約を削除すると
    // confirmed_reserved_count から座席数を引くため、引けない状態は異常
    if reservation.status == ReservationStatus::Confirmed
        && tryout.confirmed_reserved_count < reservation.reserved_seats
    {
        return Err(AppError::UnprocessableEntity(
            "確定予約数が不正なため削除できません。".into(),
        ));
    }

    Ok(())
}

/// 予約座席数の変更の可否を判定する。
pub fn validate_update_seats(
    actor: &User,
    reservation: &Reservation,
    tryout: &Tryout,
    new_seats: i32,
    now: DateTime<Utc>,
) -> AppResult<()> {
    if !actor.is_superuser && reservation.user_id != actor.id {
        return Err(AppError::ForbiddenOperation(
            "本人の予約のみ変更できます。".into(),
        ));
    }

    if reservation.status == ReservationStatus::Deleted {
        return Err(AppError::UnprocessableEntity(
            "削除済みの予約は変更できません。".into(),
        ));
    }

    if !actor.is_superuser && reservation.status == ReservationStatus::Confirmed {
        return Err(AppError::UnprocessableEntity(
            "確定済みの予約は変更できません。".into(),
        ));
    }

    if tryout.start_time <= now {
        return Err(AppError::UnprocessableEntity(
            "試験開始後は予約を変更できません。".into(),
        ));
    }

    if new_seats == reservation.reserved_seats {
        return Err(AppError::UnprocessableEntity(
            "変更された内容がありません。".into(),
        ));
    }

    let delta = new_seats - reservation.reserved_seats;
    if delta > 0 && delta > tryout.remaining_capacity() {
        return Err(AppError::TryoutFull(
            "定員を超えているため変更できません。".into(),
        ));
    }

    Ok(())
}
