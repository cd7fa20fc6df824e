use shared::{
    config::DatabaseConfig,
    error::{AppError, AppResult},
};
use sqlx::{postgres::PgConnectOptions, PgConnection, PgPool, Postgres, Transaction};

pub mod model;

fn make_pg_connect_options(cfg: &DatabaseConfig) -> PgConnectOptions {
    PgConnectOptions::new()
        .host(&cfg.host)
        .port(cfg.port)
        .username(&cfg.username)
        .password(&cfg.password)
        .database(&cfg.database)
}

#[derive(Clone)]
pub struct ConnectionPool(PgPool);

impl ConnectionPool {
    pub fn new(pool: PgPool) -> Self {
        Self(pool)
    }

    pub fn inner_ref(&self) -> &PgPool {
        &self.0
    }

    pub async fn begin(&self) -> AppResult<UnitOfWork<'_>> {
        let tx = self.0.begin().await.map_err(AppError::TransactionError)?;
        Ok(UnitOfWork::Owned(tx))
    }
}

pub fn connect_database_with(cfg: &DatabaseConfig) -> ConnectionPool {
    ConnectionPool(PgPool::connect_lazy_with(make_pg_connect_options(cfg)))
}

/// トランザクション境界。
///
/// Owned は自分で BEGIN したトランザクションを保持し、commit を呼ばずに
/// drop されればロールバックされる（sqlx の既定動作）。
/// 既にトランザクションが開いているコネクション上で操作を合成する場合は
/// join で合流する。Joined の commit は何もしない。同一コネクションで
/// BEGIN を二重に発行しないための仕組みであり、暗黙のセッション状態を
/// 調べる代わりに列挙子そのものが「開いているかどうか」のフラグになる。
pub enum UnitOfWork<'a> {
    Owned(Transaction<'a, Postgres>),
    Joined(&'a mut PgConnection),
}

impl<'a> UnitOfWork<'a> {
    pub fn join(conn: &'a mut PgConnection) -> Self {
        Self::Joined(conn)
    }

    pub fn conn(&mut self) -> &mut PgConnection {
        match self {
            Self::Owned(tx) => &mut *tx,
            Self::Joined(conn) => conn,
        }
    }

    /// 外側のトランザクションを所有している場合のみコミットする
    pub async fn commit(self) -> AppResult<()> {
        match self {
            Self::Owned(tx) => tx.commit().await.map_err(AppError::TransactionError),
            Self::Joined(_) => Ok(()),
        }
    }
}
