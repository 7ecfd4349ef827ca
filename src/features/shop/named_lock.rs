//! 按字符串键划分的互斥门注册表。
//!
//! 不同键之间互不阻塞；同一键上的持有者互斥（不保证先来先得）。
//! 每个门带引用计数，首次使用时创建，计数归零即从表中移除，
//! 因此休眠键不会无限累积。不支持同一任务对同一键重入。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

struct Gate {
    lock: Arc<AsyncMutex<()>>,
    /// 正在等待或持有该门的租约数量
    leases: usize,
}

type GateTable = Mutex<HashMap<String, Gate>>;

/// 命名锁注册表（可廉价克隆，克隆共享同一张表）
#[derive(Clone, Default)]
pub struct NamedLock {
    gates: Arc<GateTable>,
}

/// 对某个键的登记。等待与持有期间都存在；析构时归还计数。
///
/// 等待中的 `acquire` future 被取消（drop）时也会经由这里归还计数，
/// 不影响持有者与其他等待者。
struct Lease {
    gates: Arc<GateTable>,
    key: String,
}

impl Drop for Lease {
    fn drop(&mut self) {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(gate) = gates.get_mut(&self.key) {
            gate.leases -= 1;
            if gate.leases == 0 {
                gates.remove(&self.key);
            }
        }
    }
}

/// 持有某个键期间的守卫；drop 或 [`NamedLockGuard::release`] 即释放。
pub struct NamedLockGuard {
    // 字段按声明顺序析构：先放开互斥，再归还租约计数。
    _permit: OwnedMutexGuard<()>,
    lease: Lease,
}

impl NamedLockGuard {
    pub fn key(&self) -> &str {
        &self.lease.key
    }

    /// 显式释放（等价于 drop）
    pub fn release(self) {}
}

impl NamedLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取 `key` 上的互斥门，直到返回的守卫被释放。
    pub async fn acquire(&self, key: &str) -> NamedLockGuard {
        let (lease, lock) = self.register(key);
        let permit = lock.lock_owned().await;
        NamedLockGuard {
            _permit: permit,
            lease,
        }
    }

    /// 非阻塞尝试获取；键已被持有时返回 None。
    pub fn try_acquire(&self, key: &str) -> Option<NamedLockGuard> {
        let (lease, lock) = self.register(key);
        // 失败时 lease 在此处析构，计数随之归还
        let permit = lock.try_lock_owned().ok()?;
        Some(NamedLockGuard {
            _permit: permit,
            lease,
        })
    }

    /// 当前仍被等待或持有的键数量
    pub fn active_keys(&self) -> usize {
        self.gates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn register(&self, key: &str) -> (Lease, Arc<AsyncMutex<()>>) {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        let gate = gates.entry(key.to_string()).or_insert_with(|| Gate {
            lock: Arc::new(AsyncMutex::new(())),
            leases: 0,
        });
        gate.leases += 1;
        let lock = Arc::clone(&gate.lock);
        drop(gates);
        (
            Lease {
                gates: Arc::clone(&self.gates),
                key: key.to_string(),
            },
            lock,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::NamedLock;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn distinct_keys_do_not_contend() {
        let locks = NamedLock::new();
        let _a = locks.acquire("template:a").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire("template:b")).await;
        assert!(b.is_ok(), "different key must not block");
    }

    #[tokio::test]
    async fn same_key_is_mutually_exclusive() {
        let locks = NamedLock::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_seen = max_seen.clone();
            tasks.push(tokio::spawn(async move {
                let _g = locks.acquire("item-image:e1").await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for t in tasks {
            t.await.expect("task");
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(locks.active_keys(), 0);
    }

    #[tokio::test]
    async fn cancelled_waiter_does_not_disturb_holder_or_others() {
        let locks = NamedLock::new();
        let holder = locks.acquire("k").await;

        // 等待者超时被取消
        let cancelled = tokio::time::timeout(Duration::from_millis(20), locks.acquire("k")).await;
        assert!(cancelled.is_err());
        assert!(locks.try_acquire("k").is_none(), "holder still owns the key");

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let g = locks.acquire("k").await;
                g.key().to_string()
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        holder.release();
        assert_eq!(waiter.await.expect("waiter"), "k");
        assert_eq!(locks.active_keys(), 0);
    }

    #[tokio::test]
    async fn gates_are_reclaimed_when_unreferenced() {
        let locks = NamedLock::new();
        for i in 0..100 {
            let _g = locks.acquire(&format!("item-image:{i}")).await;
        }
        assert_eq!(locks.active_keys(), 0);

        let g = locks.acquire("x").await;
        assert_eq!(locks.active_keys(), 1);
        drop(g);
        assert_eq!(locks.active_keys(), 0);
    }
}
