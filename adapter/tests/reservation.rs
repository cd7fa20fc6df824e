//! Postgres を使う結合テスト。
//!
//! DATABASE_URL を設定した上で `cargo test -- --ignored` で実行する。
//! マイグレーションは起動時に適用される。各テストは毎回新しい tryout 行と
//! 新しいユーザー UUID を使うため、同一データベースで繰り返し実行できる。

use std::sync::Arc;

use adapter::database::{ConnectionPool, UnitOfWork};
use adapter::repository::reservation::ReservationRepositoryImpl;
use adapter::repository::tryout::TryoutRepositoryImpl;
use chrono::{Duration, Utc};
use kernel::model::id::{ReservationId, TryoutId, UserId};
use kernel::model::reservation::event::{ReserveTryout, UpdateReservedSeats};
use kernel::model::reservation::ReservationStatus;
use kernel::model::user::User;
use kernel::repository::reservation::ReservationRepository;
use kernel::repository::tryout::TryoutRepository;
use shared::error::AppError;
use sqlx::PgPool;

async fn setup() -> ConnectionPool {
    let log_level = match shared::env::which() {
        shared::env::Environment::Development => "debug",
        shared::env::Environment::Production => "info",
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .try_init();

    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = PgPool::connect(&url).await.expect("failed to connect");
    sqlx::migrate!("../migrations")
        .run(&pool)
        .await
        .expect("failed to run migrations");
    ConnectionPool::new(pool)
}

async fn insert_tryout(db: &ConnectionPool, max_capacity: i32, registration_open: bool) -> TryoutId {
    let now = Utc::now();
    let (reg_start, reg_end) = if registration_open {
        (now - Duration::days(1), now + Duration::days(1))
    } else {
        (now - Duration::days(2), now - Duration::days(1))
    };
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO tryouts \
         (name, start_time, end_time, registration_start_time, registration_end_time, \
          max_capacity, confirmed_reserved_count) \
         VALUES ($1, $2, $3, $4, $5, $6, 0) RETURNING id",
    )
    .bind("結合テスト用の模試")
    .bind(now + Duration::days(2))
    .bind(now + Duration::days(2) + Duration::hours(3))
    .bind(reg_start)
    .bind(reg_end)
    .bind(max_capacity)
    .fetch_one(db.inner_ref())
    .await
    .unwrap();
    TryoutId::new(id)
}

async fn confirmed_count(db: &ConnectionPool, tryout_id: TryoutId) -> i32 {
    sqlx::query_scalar::<_, i32>("SELECT confirmed_reserved_count FROM tryouts WHERE id = $1")
        .bind(tryout_id.raw())
        .fetch_one(db.inner_ref())
        .await
        .unwrap()
}

fn user() -> User {
    User::new(UserId::new(), false)
}

fn admin() -> User {
    User::new(UserId::new(), true)
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL (set DATABASE_URL)"]
async fn reserve_then_confirm_updates_the_counter() {
    let db = setup().await;
    let repo = ReservationRepositoryImpl::new(db.clone());
    let tryout_id = insert_tryout(&db, 10, true).await;

    let user_a = user();
    let user_b = user();

    // A: 6 席申請 → 確定
    let r_a = repo
        .reserve(&user_a, ReserveTryout::new(tryout_id, 6))
        .await
        .unwrap();
    assert_eq!(r_a.status, ReservationStatus::Pending);
    assert_eq!(confirmed_count(&db, tryout_id).await, 0);

    let r_a = repo.confirm(r_a.id).await.unwrap();
    assert_eq!(r_a.status, ReservationStatus::Confirmed);
    assert_eq!(confirmed_count(&db, tryout_id).await, 6);

    // B: 5 席は申請できる（pending は定員を消費しない）が、確定はできない
    let r_b = repo
        .reserve(&user_b, ReserveTryout::new(tryout_id, 5))
        .await
        .unwrap();
    let err = repo.confirm(r_b.id).await.unwrap_err();
    assert!(matches!(err, AppError::TryoutFull(_)));
    assert_eq!(confirmed_count(&db, tryout_id).await, 6);
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL (set DATABASE_URL)"]
async fn duplicate_reservation_is_rejected() {
    let db = setup().await;
    let repo = ReservationRepositoryImpl::new(db.clone());
    let tryout_id = insert_tryout(&db, 10, true).await;
    let u = user();

    repo.reserve(&u, ReserveTryout::new(tryout_id, 1))
        .await
        .unwrap();
    let err = repo
        .reserve(&u, ReserveTryout::new(tryout_id, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::AlreadyReserved(_)));
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL (set DATABASE_URL)"]
async fn rereserving_a_cancelled_tryout_reuses_the_row() {
    let db = setup().await;
    let repo = ReservationRepositoryImpl::new(db.clone());
    let tryout_id = insert_tryout(&db, 10, true).await;
    let u = user();

    let first = repo
        .reserve(&u, ReserveTryout::new(tryout_id, 2))
        .await
        .unwrap();
    repo.delete(&u, first.id).await.unwrap();

    let second = repo
        .reserve(&u, ReserveTryout::new(tryout_id, 3))
        .await
        .unwrap();
    assert_eq!(second.id, first.id);
    assert_eq!(second.status, ReservationStatus::Pending);
    assert_eq!(second.reserved_seats, 3);
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL (set DATABASE_URL)"]
async fn confirming_a_non_pending_reservation_fails_without_side_effects() {
    let db = setup().await;
    let repo = ReservationRepositoryImpl::new(db.clone());
    let tryout_id = insert_tryout(&db, 10, true).await;
    let u = user();

    let r = repo
        .reserve(&u, ReserveTryout::new(tryout_id, 4))
        .await
        .unwrap();
    repo.confirm(r.id).await.unwrap();
    assert_eq!(confirmed_count(&db, tryout_id).await, 4);

    let err = repo.confirm(r.id).await.unwrap_err();
    assert!(matches!(err, AppError::UnprocessableEntity(_)));
    assert_eq!(confirmed_count(&db, tryout_id).await, 4);
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL (set DATABASE_URL)"]
async fn deleting_a_confirmed_reservation_returns_its_seats() {
    let db = setup().await;
    let repo = ReservationRepositoryImpl::new(db.clone());
    let tryout_id = insert_tryout(&db, 10, true).await;
    let u = user();
    let a = admin();

    let r = repo
        .reserve(&u, ReserveTryout::new(tryout_id, 5))
        .await
        .unwrap();
    repo.confirm(r.id).await.unwrap();
    assert_eq!(confirmed_count(&db, tryout_id).await, 5);

    // 本人は確定済みを削除できない
    let err = repo.delete(&u, r.id).await.unwrap_err();
    assert!(matches!(err, AppError::UnprocessableEntity(_)));

    // admin が削除するとカウンタが戻る
    let deleted = repo.delete(&a, r.id).await.unwrap();
    assert_eq!(deleted.status, ReservationStatus::Deleted);
    assert_eq!(confirmed_count(&db, tryout_id).await, 0);
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL (set DATABASE_URL)"]
async fn updating_confirmed_seats_is_admin_only_and_moves_the_counter() {
    let db = setup().await;
    let repo = ReservationRepositoryImpl::new(db.clone());
    let tryout_id = insert_tryout(&db, 10, true).await;
    let u = user();
    let a = admin();

    let r = repo
        .reserve(&u, ReserveTryout::new(tryout_id, 2))
        .await
        .unwrap();
    repo.confirm(r.id).await.unwrap();

    let err = repo
        .update_seats(&u, UpdateReservedSeats::new(r.id, 5))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::UnprocessableEntity(_)));

    let updated = repo
        .update_seats(&a, UpdateReservedSeats::new(r.id, 5))
        .await
        .unwrap();
    assert_eq!(updated.reserved_seats, 5);
    assert_eq!(confirmed_count(&db, tryout_id).await, 5);
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL (set DATABASE_URL)"]
async fn reserving_outside_the_registration_window_fails() {
    let db = setup().await;
    let repo = ReservationRepositoryImpl::new(db.clone());
    let tryout_id = insert_tryout(&db, 10, false).await;

    let err = repo
        .reserve(&user(), ReserveTryout::new(tryout_id, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidReservationPeriod(_)));
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL (set DATABASE_URL)"]
async fn admins_cannot_reserve() {
    let db = setup().await;
    let repo = ReservationRepositoryImpl::new(db.clone());
    let tryout_id = insert_tryout(&db, 10, true).await;

    let err = repo
        .reserve(&admin(), ReserveTryout::new(tryout_id, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ForbiddenOperation(_)));
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL (set DATABASE_URL)"]
async fn reservation_detail_is_visible_to_owner_and_admin_only() {
    let db = setup().await;
    let repo = ReservationRepositoryImpl::new(db.clone());
    let tryout_id = insert_tryout(&db, 10, true).await;
    let u = user();

    let r = repo
        .reserve(&u, ReserveTryout::new(tryout_id, 1))
        .await
        .unwrap();

    assert!(repo.find_by_id(&u, r.id).await.is_ok());
    assert!(repo.find_by_id(&admin(), r.id).await.is_ok());
    let err = repo.find_by_id(&user(), r.id).await.unwrap_err();
    assert!(matches!(err, AppError::ForbiddenOperation(_)));

    let err = repo
        .find_by_id(&u, ReservationId::new(i64::MAX))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::EntityNotFound(_)));
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL (set DATABASE_URL)"]
async fn upcoming_listing_annotates_applied_tryouts() {
    let db = setup().await;
    let reservations = ReservationRepositoryImpl::new(db.clone());
    let tryouts = TryoutRepositoryImpl::new(db.clone());
    let tryout_id = insert_tryout(&db, 10, true).await;
    let u = user();

    reservations
        .reserve(&u, ReserveTryout::new(tryout_id, 1))
        .await
        .unwrap();

    let detail = tryouts.find_by_id(tryout_id, u.id).await.unwrap();
    assert!(detail.is_applied);

    let other = tryouts.find_by_id(tryout_id, UserId::new()).await.unwrap();
    assert!(!other.is_applied);

    let probe = tryouts.paginate_upcoming(u.id, 1, 0).await.unwrap();
    assert!(probe.total >= 1);
    let page = tryouts.paginate_upcoming(u.id, probe.total, 0).await.unwrap();
    let listed = page
        .items
        .iter()
        .find(|l| l.tryout.id == tryout_id)
        .expect("page should contain the inserted tryout");
    assert!(listed.is_applied);
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL (set DATABASE_URL)"]
async fn overlapping_reservation_on_another_tryout_is_rejected() {
    let db = setup().await;
    let repo = ReservationRepositoryImpl::new(db.clone());
    // 同じ時間帯の試験を 2 つ用意する
    let first = insert_tryout(&db, 10, true).await;
    let second = insert_tryout(&db, 10, true).await;
    let u = user();

    repo.reserve(&u, ReserveTryout::new(first, 1))
        .await
        .unwrap();
    let err = repo
        .reserve(&u, ReserveTryout::new(second, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::AlreadyReserved(_)));
}

// 定員不変条件: 並行に確定が走っても確定座席数が定員を超えないこと
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires a running PostgreSQL (set DATABASE_URL)"]
async fn concurrent_confirms_never_exceed_capacity() {
    let db = setup().await;
    let repo = Arc::new(ReservationRepositoryImpl::new(db.clone()));
    let tryout_id = insert_tryout(&db, 10, true).await;

    // 5 人がそれぞれ 3 席を申請する（pending は定員を消費しないので全員成功する）
    let mut reservation_ids = Vec::new();
    for _ in 0..5 {
        let r = repo
            .reserve(&user(), ReserveTryout::new(tryout_id, 3))
            .await
            .unwrap();
        reservation_ids.push(r.id);
    }

    let mut handles = Vec::new();
    for id in reservation_ids {
        let repo = Arc::clone(&repo);
        handles.push(tokio::spawn(async move { repo.confirm(id).await }));
    }

    let mut confirmed = 0;
    let mut full = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => confirmed += 1,
            Err(AppError::TryoutFull(_)) => full += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    // 3 席 × 3 件 = 9 席で打ち止めになる
    assert_eq!(confirmed, 3);
    assert_eq!(full, 2);
    assert_eq!(confirmed_count(&db, tryout_id).await, 9);
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL (set DATABASE_URL)"]
async fn unit_of_work_joins_an_open_transaction() {
    let db = setup().await;
    let now = Utc::now();

    let mut outer = db.begin().await.unwrap();
    let conn = outer.conn();

    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO tryouts \
         (name, start_time, end_time, registration_start_time, registration_end_time, \
          max_capacity, confirmed_reserved_count) \
         VALUES ($1, $2, $3, $4, $5, 10, 0) RETURNING id",
    )
    .bind("UoW 合流テスト")
    .bind(now + Duration::days(2))
    .bind(now + Duration::days(2) + Duration::hours(3))
    .bind(now - Duration::days(1))
    .bind(now + Duration::days(1))
    .fetch_one(&mut *conn)
    .await
    .unwrap();

    // 内側は合流するだけで BEGIN も COMMIT も発行しない
    {
        let mut inner = UnitOfWork::join(&mut *conn);
        sqlx::query("UPDATE tryouts SET max_capacity = 20 WHERE id = $1")
            .bind(id)
            .execute(inner.conn())
            .await
            .unwrap();
        inner.commit().await.unwrap();
    }

    // 外側のコミット前は他のコネクションから見えない
    let visible =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM tryouts WHERE id = $1")
            .bind(id)
            .fetch_one(db.inner_ref())
            .await
            .unwrap();
    assert_eq!(visible, 0);

    outer.commit().await.unwrap();

    let capacity = sqlx::query_scalar::<_, i32>("SELECT max_capacity FROM tryouts WHERE id = $1")
        .bind(id)
        .fetch_one(db.inner_ref())
        .await
        .unwrap();
    assert_eq!(capacity, 20);
}
