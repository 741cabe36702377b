use anyhow::{bail, Context, Result};
use clap::Parser;
use esp_records::utils::create_backup;
use esp_records::{defs, FileId, LoadOptions, Plugin, Record, SUPPORTED_EXTENSIONS};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "esp_records")]
#[command(about = "按记录模式解码、检查并重建ESP/ESM/ESL文件")]
#[command(version)]
struct Cli {
    /// 输入ESP/ESM/ESL文件路径
    #[arg(short, long)]
    input: PathBuf,

    /// 加载选项JSON文件
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 严格模式（未知子记录或解码失败即报错）
    #[arg(long)]
    strict: bool,

    /// 显示插件统计信息
    #[arg(long)]
    stats: bool,

    /// 以JSON输出所有已解码记录
    #[arg(long)]
    dump: bool,

    /// JSON输出文件路径（默认标准输出）
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// 解析后重新编码写出到指定文件
    #[arg(long)]
    rebuild: Option<PathBuf>,

    /// 重建前只保留对这些主文件的引用（逗号分隔）
    #[arg(long, value_delimiter = ',')]
    keep: Vec<String>,

    /// 静默模式(仅输出错误)
    #[arg(long)]
    quiet: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet);

    validate_input(&cli.input)?;
    let options = load_options(&cli)?;

    let registry = defs::registry().context("构建记录模式注册表失败")?;
    let mut plugin = Plugin::load(cli.input.clone(), &registry, &options)
        .with_context(|| format!("加载插件失败: {:?}", cli.input))?;
    tracing::info!(plugin = plugin.get_name(), records = plugin.records().count(), "loaded plugin");

    if cli.stats {
        println!("{}", plugin.get_stats());
    }

    if cli.dump {
        write_dump(&plugin, cli.output.as_deref())?;
    }

    if let Some(target) = &cli.rebuild {
        if !cli.keep.is_empty() {
            let keep: HashSet<FileId> = cli.keep.iter().map(|m| FileId::from(m.trim())).collect();
            plugin.keep_masters(&keep)?;
        }
        rebuild(&plugin, &registry, target)?;
    } else if !cli.keep.is_empty() {
        bail!("--keep 需要与 --rebuild 一起使用");
    }

    Ok(())
}

fn init_logging(quiet: bool) {
    let default = if quiet { "error" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// 验证输入文件
fn validate_input(input: &Path) -> Result<()> {
    if !input.exists() {
        bail!("输入文件不存在: {:?}", input);
    }

    let extension = input.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase());

    if !SUPPORTED_EXTENSIONS.iter().any(|&ext| Some(ext) == extension.as_deref()) {
        bail!("输入文件必须是ESP、ESM或ESL文件");
    }

    Ok(())
}

fn load_options(cli: &Cli) -> Result<LoadOptions> {
    let mut options = match &cli.config {
        Some(path) => LoadOptions::from_json_file(path)
            .with_context(|| format!("读取加载选项失败: {:?}", path))?,
        None => LoadOptions::default(),
    };
    if cli.strict {
        options = LoadOptions { parallel: options.parallel, ..LoadOptions::strict() };
    }
    Ok(options)
}

fn write_dump(plugin: &Plugin, output: Option<&Path>) -> Result<()> {
    let records: Vec<&Record> = plugin.decoded_records().collect();
    let dump = serde_json::json!({
        "header": &plugin.header,
        "records": records,
    });
    let text = serde_json::to_string_pretty(&dump)?;
    match output {
        Some(path) => {
            std::fs::write(path, text).with_context(|| format!("写入JSON失败: {:?}", path))?;
            tracing::info!(records = records.len(), path = ?path, "dumped records");
        }
        None => println!("{}", text),
    }
    Ok(())
}

/// 重新编码整个插件；目标已存在时先备份
fn rebuild(plugin: &Plugin, registry: &esp_records::SchemaRegistry, target: &Path) -> Result<()> {
    if target.exists() {
        let backup = create_backup(target)?;
        tracing::info!(backup = ?backup, "backed up existing file");
    }
    plugin
        .write_to_file(target, registry)
        .with_context(|| format!("写出插件失败: {:?}", target))?;
    tracing::info!(path = ?target, "rebuilt plugin");
    Ok(())
}
