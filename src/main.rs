//! 番茄小说下载器（命令行版）。
//!
//! 代码结构（读代码入口）：
//! - `base_system`：配置/日志/书籍 ID 解析等基础设施
//! - `third_party`：第三方 API 客户端（节流、重试、响应解析）
//! - `download`：下载流程编排（目录、进度续传、并发调度）
//! - `book_parser`：正文清洗与导出（txt/epub/封面）

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, anyhow};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

mod base_system;
mod book_parser;
mod download;
mod third_party;

use base_system::book_id::parse_book_id;
use base_system::config::load_or_create;
use base_system::context::{Config, OutputFormat};
use base_system::logging::{LogOptions, LogSystem};
use download::directory::DirectoryResolver;
use download::downloader::{ChapterRange, DownloadRequest, Downloader};
use download::scheduler::RunOutcome;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "fanqie-novel-fetch")]
#[command(about = "番茄小说下载器：断点续传、并发下载，导出 TXT / EPUB")]
struct Cli {
    /// 启用调试日志输出
    #[arg(long, default_value_t = false, global = true)]
    debug: bool,

    /// 显示版本信息后退出
    #[arg(long, default_value_t = false)]
    version: bool,

    /// 数据目录路径（用于存放 config.yml 和 logs 等文件）
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 按关键词搜索书籍
    Search { keyword: String },
    /// 查看书籍信息与章节数
    Info {
        /// 书籍 ID 或分享链接
        book: String,
    },
    /// 下载整本书或指定章节范围
    Download {
        /// 书籍 ID 或分享链接
        book: String,
        /// 输出格式，缺省取配置文件中的 novel_format
        #[arg(long, value_enum)]
        format: Option<FormatArg>,
        /// 章节范围（1 起始，闭区间），例如 1-50、10-、7
        #[arg(long)]
        range: Option<ChapterRange>,
        /// 输出文件路径
        #[arg(long, short)]
        output: Option<PathBuf>,
        /// 忽略已保存的进度，重新下载全部章节
        #[arg(long, default_value_t = false)]
        fresh: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Txt,
    Epub,
}

impl From<FormatArg> for OutputFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Txt => OutputFormat::Txt,
            FormatArg::Epub => OutputFormat::Epub,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("fanqie-novel-fetch v{}", VERSION);
        return Ok(());
    }
    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    let data_dir = cli.data_dir.as_deref();
    let _log = init_logging(cli.debug, data_dir)?;
    info!(target: "startup", "当前版本: v{}", VERSION);

    let config = load_config(data_dir)?;

    let cancel = Arc::new(AtomicBool::new(false));
    install_ctrlc(cancel.clone());

    let downloader = Downloader::new(config.clone(), cancel)?.show_progress(true);

    match command {
        Command::Search { keyword } => run_search(&downloader, &keyword),
        Command::Info { book } => run_info(&downloader, &book),
        Command::Download {
            book,
            format,
            range,
            output,
            fresh,
        } => {
            let request = DownloadRequest {
                book_id: resolve_book_id(&book)?,
                format: format.map(Into::into).unwrap_or_else(|| config.output_format()),
                range,
                output,
                fresh,
            };
            run_download(&downloader, &request)
        }
    }
}

fn init_logging(debug: bool, base_dir: Option<&Path>) -> Result<LogSystem> {
    let opts = LogOptions {
        debug,
        use_color: true,
        archive_on_exit: true,
        console: true,
    };
    LogSystem::init(opts, base_dir).context("初始化日志失败")
}

fn load_config(data_dir: Option<&Path>) -> Result<Config> {
    load_or_create::<Config>(None, data_dir).context("加载配置失败")
}

/// 第一次 Ctrl+C 请求停止（进行中的章节会收尾并保存进度），第二次直接退出。
fn install_ctrlc(cancel: Arc<AtomicBool>) {
    let result = ctrlc::set_handler(move || {
        if cancel.swap(true, Ordering::SeqCst) {
            std::process::exit(130);
        }
        eprintln!("\n正在停止下载，再按一次 Ctrl+C 强制退出");
    });
    if let Err(e) = result {
        warn!(target: "startup", error = %e, "注册 Ctrl+C 处理失败");
    }
}

fn resolve_book_id(input: &str) -> Result<String> {
    parse_book_id(input).ok_or_else(|| anyhow!("无法从输入中识别书籍 ID: {input}"))
}

fn run_search(downloader: &Downloader, keyword: &str) -> Result<()> {
    let results = downloader
        .client()
        .search(keyword)
        .with_context(|| format!("搜索“{keyword}”失败"))?;
    if results.is_empty() {
        println!("没有找到相关书籍");
        return Ok(());
    }
    for (i, book) in results.iter().enumerate() {
        println!(
            "{:>2}. {}  作者：{}  ID：{}  {} {} {}字",
            i + 1,
            book.title,
            book.author,
            book.book_id,
            book.category,
            book.creation_status,
            book.word_number
        );
    }
    Ok(())
}

fn run_info(downloader: &Downloader, input: &str) -> Result<()> {
    let book_id = resolve_book_id(input)?;
    let resolver = DirectoryResolver::new(downloader.client());
    let book = resolver.book(&book_id);
    let chapters = resolver
        .resolve(&book_id)
        .with_context(|| format!("无法获取《{}》的章节目录", book.title))?;

    println!("书名：{}", book.title);
    if let Some(alias) = &book.original_title {
        println!("别名：{alias}");
    }
    println!("作者：{}", book.author);
    println!("章节：{} 章", chapters.len());
    if let (Some(first), Some(last)) = (chapters.first(), chapters.last()) {
        println!("首章：{}", first.title);
        println!("末章：{}", last.title);
    }
    println!("简介：{}", book.description);
    Ok(())
}

fn run_download(downloader: &Downloader, request: &DownloadRequest) -> Result<()> {
    let summary = downloader.download(request)?;
    if !summary.resume_available {
        println!("提示：本次进度未能保存，中断后无法断点续传");
    }
    match &summary.outcome {
        RunOutcome::Completed => {
            if let Some(path) = &summary.output {
                println!("《{}》下载完成：{}", summary.book.title, path.display());
            }
        }
        RunOutcome::PartialFailure { failed_chapters } => {
            println!("以下 {} 章下载失败：", failed_chapters.len());
            for ch in failed_chapters {
                println!("  第 {} 章 {}", ch.sequence_index + 1, ch.title);
            }
            if let Some(path) = &summary.output {
                println!(
                    "已生成 {}，失败章节以占位文本代替；重新运行同一命令可补全",
                    path.display()
                );
            }
        }
        RunOutcome::Canceled { remaining } => {
            println!("下载已停止，剩余 {remaining} 章；重新运行同一命令可继续");
        }
    }
    Ok(())
}
