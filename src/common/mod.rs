// 内部通用工具：一次性轮询探测与阶段截止时间。
pub(crate) mod task;
pub(crate) mod time;
