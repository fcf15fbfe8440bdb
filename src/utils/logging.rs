use env_logger::Builder;
use log::LevelFilter;
use std::io::Write;

/// Modules that carry raw vendor stream events.
const STREAM_MODULES: &[&str] = &[
    "notewright_llm::adapters::bedrock",
    "notewright_llm::adapters::gemini",
    "notewright_llm::adapters::groq",
    "notewright_llm::sse",
];

/// Initialize the logger. Call once, from the binary.
///
/// Defaults to `info` for notewright crates and `warn` for networking noise.
/// `RUST_LOG` overrides everything; `NOTEWRIGHT_STREAMING_DEBUG` traces the
/// adapter streams. Logs go to stderr so streamed replies on stdout stay
/// clean.
pub fn init_logger() {
    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Warn);

    builder.filter_module("hyper", LevelFilter::Warn);
    builder.filter_module("reqwest", LevelFilter::Warn);
    builder.filter_module("mio", LevelFilter::Warn);

    let rust_log = std::env::var("RUST_LOG").unwrap_or_default();
    if !rust_log.contains("notewright") {
        builder.filter_module("notewright", LevelFilter::Info);
        builder.filter_module("notewright_llm", LevelFilter::Info);
        builder.filter_module("notewright_edit", LevelFilter::Info);

        if std::env::var("NOTEWRIGHT_STREAMING_DEBUG").is_ok() {
            for module in STREAM_MODULES {
                builder.filter_module(module, LevelFilter::Trace);
            }
        }
    }

    if !rust_log.is_empty() {
        builder.parse_filters(&rust_log);
    }

    builder
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                buf.timestamp_millis(),
                record.level(),
                record.module_path().unwrap_or_default(),
                record.args()
            )
        })
        .target(env_logger::Target::Stderr)
        .write_style(env_logger::WriteStyle::Auto);

    // A second initialization (tests, embedding) is harmless.
    if builder.try_init().is_err() {
        log::debug!("Logger already initialized");
    }
}
