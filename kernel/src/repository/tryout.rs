use async_trait::async_trait;
use shared::error::AppResult;

use crate::model::{
    id::{TryoutId, UserId},
    list::PaginatedList,
    tryout::TryoutListing,
};

#[async_trait]
pub trait TryoutRepository: Send + Sync {
    // 試験の詳細を取得する。ユーザーの申請有無（is_applied）を付与する
    async fn find_by_id(&self, tryout_id: TryoutId, user_id: UserId) -> AppResult<TryoutListing>;
    // 開始前の試験一覧を (id, start_time) 昇順で取得する
    async fn paginate_upcoming(
        &self,
        user_id: UserId,
        limit: i64,
        offset: i64,
    ) -> AppResult<PaginatedList<TryoutListing>>;
}
