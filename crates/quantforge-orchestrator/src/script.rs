// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shell scripts run inside workload pods.
//!
//! User-controlled values (strategy names, exchange names, pair patterns,
//! timeframes) only ever reach the shell through [`shell_quote`]. URLs are
//! passed through environment variables and never interpolated.

use crate::task::{BacktestSpec, DataDownloadSpec, HyperOptSpec, TaskKind};

/// Marker line printed before the result document.
pub const RESULT_START_MARKER: &str = "===RESULT_START===";
/// Marker line printed after the result document.
pub const RESULT_END_MARKER: &str = "===RESULT_END===";
/// Prefix of the line printed after each exchange download (`===EXCHANGE_DONE 1/3===`).
pub const EXCHANGE_DONE_PREFIX: &str = "===EXCHANGE_DONE ";

/// Shared writable working directory.
pub const WORKSPACE_DIR: &str = "/workspace";
/// Read-only mount of the configuration config object.
pub const CONFIG_MOUNT_DIR: &str = "/config";
/// Read-only mount of the strategy config object.
pub const STRATEGY_MOUNT_DIR: &str = "/strategy";
/// User data directory inside the workspace.
pub const USER_DATA_DIR: &str = "/workspace/user_data";

/// Key of the configuration document inside the config object.
pub const CONFIG_FILE: &str = "config.json";
/// Key of the download script inside a data-download config object.
pub const DOWNLOAD_SCRIPT_FILE: &str = "download.sh";
/// Key of the exchange list inside a data-download config object.
pub const EXCHANGES_FILE: &str = "exchanges.json";

/// Environment variable carrying the optional market-data archive URL.
pub const DATA_URL_ENV: &str = "DATA_URL";
/// Environment variable carrying the optional upload URL.
pub const UPLOAD_URL_ENV: &str = "UPLOAD_URL";

/// Quote a value as a single POSIX shell word.
///
/// The value is wrapped in single quotes; embedded single quotes are closed,
/// escaped and reopened (`'\''`), so nothing inside is expanded.
pub fn shell_quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        if c == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(c);
        }
    }
    quoted.push('\'');
    quoted
}

/// Longest accepted strategy name; keeps `<name>.py` within the config key limit.
const MAX_STRATEGY_NAME_LEN: usize = 200;

/// Check that a strategy name is a Python identifier.
///
/// The name becomes both the class freqtrade loads and a config object key,
/// so anything outside `[A-Za-z_][A-Za-z0-9_]*` is rejected before submission.
pub fn validate_strategy_name(name: &str) -> Result<(), String> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err("strategy name is empty".to_string());
    };
    if !(first.is_ascii_alphabetic() || first == '_') {
        return Err(format!(
            "strategy name {:?} must start with a letter or '_'",
            name
        ));
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(format!(
            "strategy name {:?} may only contain letters, digits and '_'",
            name
        ));
    }
    if name.len() > MAX_STRATEGY_NAME_LEN {
        return Err(format!(
            "strategy name {:?} exceeds {} characters",
            name, MAX_STRATEGY_NAME_LEN
        ));
    }
    Ok(())
}

/// File name the strategy source is staged under.
pub fn strategy_file_name(strategy_name: &str) -> String {
    format!("{}.py", strategy_name)
}

/// Script run by the init container to build the workspace.
///
/// Copies the read-only config objects into the `user_data` layout and, when
/// `DATA_URL` is set, tries to fetch and unpack a market-data archive. A failed
/// archive download only logs a warning.
pub fn staging_script(kind: TaskKind) -> String {
    let mut script = String::from("set -eu\n");
    script.push_str(&format!(
        "mkdir -p {ud}/strategies {ud}/data {ud}/backtest_results {ud}/hyperopt_results\n",
        ud = USER_DATA_DIR
    ));

    match kind {
        TaskKind::Backtest | TaskKind::HyperOpt => {
            script.push_str(&format!(
                "cp {}/{} {}/{}\n",
                CONFIG_MOUNT_DIR, CONFIG_FILE, USER_DATA_DIR, CONFIG_FILE
            ));
            script.push_str(&format!(
                "cp {}/*.py {}/strategies/\n",
                STRATEGY_MOUNT_DIR, USER_DATA_DIR
            ));
        }
        TaskKind::DataDownload => {
            script.push_str(&format!(
                "cp {}/{} {}/{}\n",
                CONFIG_MOUNT_DIR, DOWNLOAD_SCRIPT_FILE, WORKSPACE_DIR, DOWNLOAD_SCRIPT_FILE
            ));
            script.push_str(&format!(
                "cp {}/{} {}/{}\n",
                CONFIG_MOUNT_DIR, EXCHANGES_FILE, WORKSPACE_DIR, EXCHANGES_FILE
            ));
        }
    }

    script.push_str(&format!(
        r#"if [ -n "${{{env}:-}}" ]; then
  if wget -q -O /tmp/data.tar.gz "${env}" && tar -xzf /tmp/data.tar.gz -C {ud}/data; then
    echo "staged market data archive"
  else
    echo "warning: optional market data download failed, continuing without it" >&2
  fi
  rm -f /tmp/data.tar.gz
fi
"#,
        env = DATA_URL_ENV,
        ud = USER_DATA_DIR
    ));
    script.push_str(&format!("chmod -R a+rwX {}\n", WORKSPACE_DIR));
    script
}

/// Print the latest backtest result in `results_dir` between the result markers.
///
/// freqtrade records the latest export in `.last_result.json`; current
/// releases export a `.zip` holding `<name>.json`, older ones a bare `.json`.
/// Without the pointer file the newest export is used.
fn emit_backtest_result(results_dir: &str) -> String {
    format!(
        r#"results={dir}
latest=""
if [ -f "$results/.last_result.json" ]; then
  latest=$(sed -n 's/.*"latest_backtest"[[:space:]]*:[[:space:]]*"\([^"]*\)".*/\1/p' "$results/.last_result.json" | head -n 1)
fi
if [ -z "$latest" ] || [ ! -f "$results/$latest" ]; then
  latest=$(ls -t "$results" 2>/dev/null | grep -e '\.zip$' -e '\.json$' | grep -v -e '\.meta\.json$' -e '_config\.json$' | head -n 1)
fi
result=""
case "$latest" in
  *.zip)
    result=$(python3 -c 'import sys, zipfile; sys.stdout.write(zipfile.ZipFile(sys.argv[1]).read(sys.argv[2]).decode())' "$results/$latest" "${{latest%.zip}}.json" 2>/dev/null)
    ;;
  *.json)
    result=$(cat "$results/$latest" 2>/dev/null)
    ;;
esac
if [ -n "$result" ]; then
  echo "{start}"
  printf '%s\n' "$result"
  echo "{end}"
fi
"#,
        dir = shell_quote(results_dir),
        start = RESULT_START_MARKER,
        end = RESULT_END_MARKER
    )
}

/// Main container script for a backtest.
pub fn backtest_script(spec: &BacktestSpec) -> String {
    let mut command = format!(
        "freqtrade backtesting --config {ud}/{cfg} --userdir {ud} --strategy {strategy} \
         --export trades --backtest-directory {ud}/backtest_results",
        ud = USER_DATA_DIR,
        cfg = CONFIG_FILE,
        strategy = shell_quote(&spec.strategy_name)
    );
    if let Some(timerange) = &spec.timerange {
        command.push_str(&format!(" --timerange {}", shell_quote(timerange)));
    }

    let mut script = String::from("set -u\n");
    script.push_str(&command);
    script.push('\n');
    script.push_str("status=$?\n");
    script.push_str(&emit_backtest_result(&format!(
        "{}/backtest_results",
        USER_DATA_DIR
    )));
    script.push_str("exit $status\n");
    script
}

/// Main container script for a hyperopt run.
pub fn hyperopt_script(spec: &HyperOptSpec) -> String {
    let mut command = format!(
        "freqtrade hyperopt --config {ud}/{cfg} --userdir {ud} --strategy {strategy} \
         --hyperopt-loss {loss} --epochs {epochs} --no-color",
        ud = USER_DATA_DIR,
        cfg = CONFIG_FILE,
        strategy = shell_quote(&spec.strategy_name),
        loss = shell_quote(&spec.loss_function),
        epochs = spec.epochs
    );
    if !spec.spaces.is_empty() {
        command.push_str(" --spaces");
        for space in &spec.spaces {
            command.push(' ');
            command.push_str(&shell_quote(space));
        }
    }
    if let Some(timerange) = &spec.timerange {
        command.push_str(&format!(" --timerange {}", shell_quote(timerange)));
    }

    let mut script = String::from("set -u\n");
    script.push_str(&command);
    script.push('\n');
    script.push_str("status=$?\n");
    script.push_str(&format!(
        r#"best=$(freqtrade hyperopt-show --best --print-json --no-header --config {ud}/{cfg} --userdir {ud} 2>/dev/null | grep '^{{' | tail -n 1)
if [ -n "$best" ]; then
  echo "{start}"
  printf '%s\n' "$best"
  echo "{end}"
fi
"#,
        ud = USER_DATA_DIR,
        cfg = CONFIG_FILE,
        start = RESULT_START_MARKER,
        end = RESULT_END_MARKER
    ));
    script.push_str("exit $status\n");
    script
}

/// Download script stored in the data-download config object.
///
/// Exchanges are downloaded in order; a failing exchange marks the run as
/// failed but does not stop the remaining ones. Progress lines are printed
/// after each exchange. When `UPLOAD_URL` is set the data directory is archived
/// and uploaded with an HTTP PUT.
pub fn download_script(spec: &DataDownloadSpec) -> String {
    let total = spec.exchanges.len();
    let mut script = String::from("#!/bin/sh\nset -u\nfailed=0\n");
    script.push_str(&format!("echo \"downloading {} exchange(s)\"\n", total));

    for (index, exchange) in spec.exchanges.iter().enumerate() {
        let mut command = format!(
            "freqtrade download-data --userdir {ud} --exchange {exchange} --pairs {pairs} \
             --days {days} --trading-mode {mode}",
            ud = USER_DATA_DIR,
            exchange = shell_quote(&exchange.name),
            pairs = shell_quote(&exchange.pair_pattern),
            days = exchange.days,
            mode = shell_quote(exchange.trading_mode.as_str())
        );
        if !exchange.timeframes.is_empty() {
            command.push_str(" --timeframes");
            for timeframe in &exchange.timeframes {
                command.push(' ');
                command.push_str(&shell_quote(timeframe));
            }
        }
        script.push_str(&format!("echo \"exchange {}/{}\"\n", index + 1, total));
        script.push_str(&command);
        script.push_str(" || failed=1\n");
        script.push_str(&format!(
            "echo \"{}{}/{}===\"\n",
            EXCHANGE_DONE_PREFIX,
            index + 1,
            total
        ));
    }

    script.push_str(&format!(
        r#"if [ -n "${{{env}:-}}" ]; then
  if tar -czf /tmp/market-data.tar.gz -C {ud}/data . && python3 -c 'import os, urllib.request; body = open("/tmp/market-data.tar.gz", "rb").read(); req = urllib.request.Request(os.environ["{env}"], data=body, method="PUT", headers={{"Content-Type": "application/gzip"}}); urllib.request.urlopen(req)'; then
    echo "uploaded market data archive"
  else
    echo "error: market data upload failed" >&2
    failed=1
  fi
fi
exit $failed
"#,
        env = UPLOAD_URL_ENV,
        ud = USER_DATA_DIR
    ));
    script
}

/// Parse a `===EXCHANGE_DONE i/n===` line into (i, n).
pub fn parse_exchange_done(line: &str) -> Option<(u32, u32)> {
    let rest = line.trim().strip_prefix(EXCHANGE_DONE_PREFIX)?;
    let rest = rest.strip_suffix("===")?;
    let (done, total) = rest.split_once('/')?;
    let done: u32 = done.trim().parse().ok()?;
    let total: u32 = total.trim().parse().ok()?;
    if total == 0 || done > total {
        return None;
    }
    Some((done, total))
}
