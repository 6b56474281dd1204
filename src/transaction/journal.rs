//! Journal Transaction 系统占位实现
//!
//! ⚠️ **占位实现 - 尚未完成**
//!
//! 这是 ext4 journal 系统的占位实现，提供 API 接口但功能尚未实现。
//! 完整的 journal 实现将在后续版本中提供。
//!
//! ## 设计目标（未来）
//!
//! 1. 提供崩溃恢复保证（crash consistency）
//! 2. 支持原子性事务（atomic transactions）
//! 3. 兼容 ext4 journal 格式
//! 4. 支持 ordered、writeback、journal 三种模式
//!
//! ## 当前状态
//!
//! - ❌ Journal 初始化
//! - ❌ 事务日志写入
//! - ❌ 检查点（checkpoint）
//! - ❌ 日志恢复（recovery）
//! - ❌ 日志提交（commit）
//! - ❌ 日志回滚（abort）
//!
//! ## 实现需求
//!
//! 完整实现需要：
//! 1. Journal 超级块解析和验证
//! 2. Journal 描述符块（descriptor blocks）处理
//! 3. Journal 提交块（commit blocks）处理
//! 4. Journal 撤销块（revoke blocks）处理
//! 5. 事务状态机管理
//! 6. 日志空间管理和回绕
//! 7. 恢复扫描和回放
//!
//! 对应 lwext4 的 ext4_journal.c

use crate::{
    block::{Block, BlockDev, BlockDevice},
    error::{Error, ErrorKind, Result},
};

/// Journal Transaction（占位实现）
///
/// ⚠️ **尚未实现** - 所有操作都会返回 `Unsupported` 错误
///
/// 未来这将提供完整的 journal 支持，包括：
/// - 崩溃一致性
/// - 原子性事务
/// - 日志恢复
///
/// 对应 lwext4 的 journal transaction 机制
pub struct JournalTransaction<'a, D: BlockDevice> {
    /// 块设备引用（占位）
    _bdev: &'a mut BlockDev<D>,

    /// 事务状态（占位）
    _state: JournalState,

    /// Journal 句柄（占位）
    _journal_handle: Option<JournalHandle>,
}

/// Journal 状态（占位）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JournalState {
    /// 未初始化
    Uninitialized,

    /// 活跃状态
    Active,

    /// 提交中
    Committing,

    /// 已提交
    Committed,

    /// 已终止
    Aborted,
}

/// Journal 句柄（占位）
#[derive(Debug)]
struct JournalHandle {
    /// 事务 ID（占位）
    _transaction_id: u64,
}

impl<'a, D: BlockDevice> JournalTransaction<'a, D> {
    /// 开始新的 journal transaction（占位实现）
    ///
    /// ⚠️ **尚未实现** - 总是返回 `Unsupported` 错误
    ///
    /// # 参数
    ///
    /// * `bdev` - 块设备引用
    ///
    /// # 返回
    ///
    /// `Err(Unsupported)` - 功能未实现
    ///
    /// # 未来实现
    ///
    /// 未来此函数将：
    /// 1. 验证 journal 有效性
    /// 2. 分配新的事务 ID
    /// 3. 初始化事务状态
    /// 4. 预留 journal 空间
    pub fn begin(_bdev: &'a mut BlockDev<D>) -> Result<Self> {
        Err(Error::new(
            ErrorKind::Unsupported,
            "Journal transactions not yet implemented - use SimpleTransaction for now",
        ))
    }

    /// 获取块用于读取或修改（占位实现）
    ///
    /// ⚠️ **尚未实现**
    ///
    /// # 未来实现
    ///
    /// 未来此函数将：
    /// 1. 从 journal 或文件系统读取块
    /// 2. 跟踪块访问以便回滚
    /// 3. 处理写时复制（COW）逻辑
    pub fn get_block(&mut self, _lba: u64) -> Result<Block<D>> {
        Err(Error::new(
            ErrorKind::Unsupported,
            "Journal get_block not yet implemented",
        ))
    }

    /// 标记块为脏（占位实现）
    ///
    /// ⚠️ **尚未实现**
    ///
    /// # 未来实现
    ///
    /// 未来此函数将：
    /// 1. 将块添加到 journal 日志
    /// 2. 创建描述符块条目
    /// 3. 记录修改元数据
    pub fn mark_dirty(&mut self, _lba: u64) -> Result<()> {
        Err(Error::new(
            ErrorKind::Unsupported,
            "Journal mark_dirty not yet implemented",
        ))
    }

    /// 提交事务（占位实现）
    ///
    /// ⚠️ **尚未实现**
    ///
    /// # 未来实现
    ///
    /// 未来此函数将：
    /// 1. 写入 journal 描述符块
    /// 2. 写入数据块到 journal
    /// 3. 写入 journal 提交块
    /// 4. 等待 journal 写入完成
    /// 5. 更新文件系统块
    /// 6. 执行检查点
    pub fn commit(self) -> Result<()> {
        Err(Error::new(
            ErrorKind::Unsupported,
            "Journal commit not yet implemented",
        ))
    }

    /// 回滚事务（占位实现）
    ///
    /// ⚠️ **尚未实现**
    ///
    /// # 未来实现
    ///
    /// 未来此函数将：
    /// 1. 丢弃所有未提交的修改
    /// 2. 释放 journal 空间
    /// 3. 清理事务状态
    pub fn abort(self) -> Result<()> {
        Err(Error::new(
            ErrorKind::Unsupported,
            "Journal abort not yet implemented",
        ))
    }
}

// ============================================================================
// Journal 核心功能（占位）
// ============================================================================

/// Journal 初始化（占位函数）
///
/// ⚠️ **尚未实现**
///
/// # 未来实现
///
/// 对应 lwext4 的 `ext4_journal_init()`
///
/// 将执行：
/// 1. 定位 journal inode 或设备
/// 2. 验证 journal 超级块
/// 3. 执行日志恢复（如需要）
/// 4. 初始化 journal 数据结构
pub fn journal_init<D: BlockDevice>(_bdev: &mut BlockDev<D>) -> Result<()> {
    Err(Error::new(
        ErrorKind::Unsupported,
        "Journal init not yet implemented",
    ))
}

/// Journal 恢复（占位函数）
///
/// ⚠️ **尚未实现**
///
/// # 未来实现
///
/// 对应 lwext4 的 `ext4_journal_recover()`
///
/// 将执行：
/// 1. 扫描 journal 查找未完成的事务
/// 2. 回放已提交但未应用的事务
/// 3. 撤销未提交的事务
/// 4. 更新 journal 超级块
pub fn journal_recover<D: BlockDevice>(_bdev: &mut BlockDev<D>) -> Result<()> {
    Err(Error::new(
        ErrorKind::Unsupported,
        "Journal recovery not yet implemented",
    ))
}

/// Journal 停止（占位函数）
///
/// ⚠️ **尚未实现**
///
/// # 未来实现
///
/// 对应 lwext4 的 `ext4_journal_stop()`
///
/// 将执行：
/// 1. 等待所有活跃事务完成
/// 2. 执行最终检查点
/// 3. 更新 journal 超级块
/// 4. 释放 journal 资源
pub fn journal_stop<D: BlockDevice>(_bdev: &mut BlockDev<D>) -> Result<()> {
    Err(Error::new(
        ErrorKind::Unsupported,
        "Journal stop not yet implemented",
    ))
}

// ============================================================================
// 未实现的内部函数（设计参考）
// ============================================================================
//
// 以下是完整 journal 实现需要的核心函数（来自 lwext4）：
//
// Journal 块管理：
// ❌ journal_get_block() - 获取 journal 块
// ❌ journal_put_block() - 释放 journal 块
// ❌ journal_alloc_block() - 分配 journal 块
//
// 描述符块：
// ❌ journal_write_descriptor() - 写入描述符块
// ❌ journal_parse_descriptor() - 解析描述符块
//
// 提交块：
// ❌ journal_write_commit() - 写入提交块
// ❌ journal_verify_commit() - 验证提交块
//
// 撤销块：
// ❌ journal_add_revoke() - 添加撤销记录
// ❌ journal_process_revoke() - 处理撤销记录
//
// 检查点：
// ❌ journal_checkpoint() - 执行检查点
// ❌ journal_update_superblock() - 更新 journal 超级块
//
// 事务管理：
// ❌ journal_start_transaction() - 开始事务
// ❌ journal_commit_transaction() - 提交事务
// ❌ journal_abort_transaction() - 终止事务
//
// 恢复：
// ❌ journal_scan_recovery() - 扫描恢复日志
// ❌ journal_replay_transaction() - 回放事务
// ❌ journal_undo_transaction() - 撤销事务
//
// 这些将在完整 journal 实现中逐步添加。
//

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_journal_transaction_not_implemented() {
        // 测试占位实现确实返回 Unsupported
        // 这需要 mock BlockDevice，暂时跳过
    }

    #[test]
    fn test_journal_state() {
        let state = JournalState::Uninitialized;
        assert_eq!(state, JournalState::Uninitialized);
    }
}
