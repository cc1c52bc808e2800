use anyhow::Result;
use env_logger::Env;
use video_topics::config::Config;
use video_topics::pipeline::{parse_topic_count, Pipeline};

fn usage() {
    eprintln!("使い方:");
    eprintln!("  video-topics <video_url> [num_topics] [--config <path>]");
    eprintln!("  video-topics --generate-config [path]");
}

#[tokio::main]
async fn main() -> Result<()> {
    // コマンドライン引数をパース
    let args: Vec<String> = std::env::args().skip(1).collect();

    // 設定ファイル生成モード
    if args.first().map(String::as_str) == Some("--generate-config") {
        let config_path = args.get(1).map(String::as_str).unwrap_or("config.toml");
        Config::write_default(config_path)?;
        println!("設定ファイルを生成しました: {}", config_path);
        return Ok(());
    }

    let mut config_path = "config.toml".to_string();
    let mut positional = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => match iter.next() {
                Some(path) => config_path = path.clone(),
                None => {
                    usage();
                    std::process::exit(2);
                }
            },
            "-h" | "--help" => {
                usage();
                return Ok(());
            }
            _ => positional.push(arg.as_str()),
        }
    }

    // 設定を読み込み
    let config = Config::load_or_default(&config_path)?;

    // ロガーを初期化
    env_logger::Builder::from_env(Env::default().default_filter_or(config.output.log_level.as_str()))
        .format_timestamp(None)
        .init();

    let Some(video_url) = positional.first().copied() else {
        usage();
        std::process::exit(2);
    };
    let num_topics = parse_topic_count(
        positional.get(1).copied(),
        config.pipeline.default_topic_count,
    );

    log::info!("video-topics を起動します");
    log::debug!("パイプライン設定: {:?}", config.pipeline);
    log::info!("video_url: {} / num_topics: {}", video_url, num_topics);

    let api_key = config.openai.resolve_api_key()?;
    let pipeline = Pipeline::from_config(&config, api_key)?;

    match pipeline.process(video_url, num_topics).await {
        Ok(topics) => {
            // JSON形式で出力
            println!("{}", serde_json::to_string(&topics)?);
            Ok(())
        }
        Err(e) => {
            let body = serde_json::json!({
                "error": e.to_string(),
                "category": e.category(),
            });
            println!("{}", body);
            std::process::exit(1);
        }
    }
}
