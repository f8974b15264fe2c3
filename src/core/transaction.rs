use crate::domain::ports::TransactionManager;
use crate::utils::error::Result;
use std::future::Future;

/// 在單一交易中執行 `callback`。
///
/// callback 失敗時回滾並原樣回傳錯誤；成功時提交，提交失敗同樣原樣回傳。
pub async fn exec_transaction<M, F, Fut, T>(manager: &M, callback: F) -> Result<T>
where
    M: TransactionManager + ?Sized,
    F: FnOnce(M::Tx) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let tx = manager.begin().await.map_err(|e| {
        tracing::error!("TransactionManager, begin transaction error: {}", e);
        e
    })?;

    match callback(tx.clone()).await {
        Ok(value) => {
            manager.commit(tx).await.map_err(|e| {
                tracing::error!("TransactionManager, commit transaction error: {}", e);
                e
            })?;
            Ok(value)
        }
        Err(err) => {
            if err.is_client_error() {
                tracing::debug!("TransactionManager, exec transaction rejected: {}", err);
            } else {
                tracing::error!("TransactionManager, exec transaction error: {}", err);
            }
            if let Err(rollback_err) = manager.rollback(tx).await {
                tracing::error!(
                    "TransactionManager, rollback transaction error: {}",
                    rollback_err
                );
            }
            Err(err)
        }
    }
}
