//! 内存数据库注册表
//!
//! BTreeMap 保证遍历顺序稳定 (按 database id 排序)。

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use contracts::{DatabaseId, DatabaseRegistry};

use crate::chain::MemoryDatabase;

/// 内存数据库注册表
#[derive(Default)]
pub struct MemoryRegistry {
    databases: RwLock<BTreeMap<DatabaseId, Arc<MemoryDatabase>>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册数据库，返回共享句柄
    pub fn insert(&self, database: MemoryDatabase) -> Arc<MemoryDatabase> {
        use contracts::ChainDatabase;

        let database = Arc::new(database);
        self.databases
            .write()
            .unwrap()
            .insert(database.database_id().clone(), Arc::clone(&database));
        database
    }

    /// 注销数据库
    pub fn remove(&self, id: &DatabaseId) -> Option<Arc<MemoryDatabase>> {
        self.databases.write().unwrap().remove(id)
    }

    pub fn len(&self) -> usize {
        self.databases.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DatabaseRegistry for MemoryRegistry {
    type Database = MemoryDatabase;

    fn lookup(&self, id: &DatabaseId) -> Option<Arc<MemoryDatabase>> {
        self.databases.read().unwrap().get(id).cloned()
    }

    fn for_each(&self, f: &mut dyn FnMut(&DatabaseId, &Arc<MemoryDatabase>) -> bool) {
        // Snapshot first so `f` may touch the registry
        let entries: Vec<_> = self
            .databases
            .read()
            .unwrap()
            .iter()
            .map(|(id, db)| (id.clone(), Arc::clone(db)))
            .collect();

        for (id, db) in &entries {
            if !f(id, db) {
                break;
            }
        }
    }
}
