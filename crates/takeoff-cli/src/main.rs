//! takeoff 命令行入口
//!
//! 输入输出均为 JSON；日志写到 stderr。退出码按错误类别区分：
//! 2 输入无效、3 公式无效、4 操作不适用、5 编辑被拒绝、6 未找到、7 IO。

fn main() {
    if let Err(error) = takeoff_cli::run(std::env::args_os()) {
        eprintln!("{error:#}");
        std::process::exit(takeoff_cli::exit_code(&error));
    }
}
