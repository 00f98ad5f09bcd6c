//! 条件编译配置宏模块
//!
//! tether 只有一个会裁剪代码的 feature：`tcp`。关闭它之后，crate 中不再包含
//! 基于 tokio 的 TCP 连接器、执行器和定时器，使用者需要通过 `Builder` 自行
//! 提供 `Connect`、`Executor` 和 `Timer` 的实现。
//!
//! 本模块在 `lib.rs` 中最先以 `#[macro_use]` 引入，其余模块都可以使用这里的宏。

/// `cfg_feature!`：基础条件编译宏
///
/// 为每个 item 同时加上：
/// - `#[cfg($meta)]`：实际的条件编译控制
/// - `#[cfg_attr(docsrs, doc(cfg($meta)))]`：在 docs.rs 上标注所需的 feature
macro_rules! cfg_feature {
    (
        #![$meta:meta]
        $($item:item)*
    ) => {
        $(
            #[cfg($meta)]
            #[cfg_attr(docsrs, doc(cfg($meta)))]
            $item
        )*
    }
}

/// `cfg_tcp!`：仅在启用 `tcp` feature 时编译被包裹的 item。
macro_rules! cfg_tcp {
    ($($item:item)*) => {
        cfg_feature! {
            #![feature = "tcp"]
            $($item)*
        }
    }
}
