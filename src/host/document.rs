//! Document assembly for the script/markup family.
//!
//! The user's source is wrapped into a generated document: an
//! instrumentation preamble first, then the user's script code. The preamble
//! rebinds the four console stream functions so every call is serialized
//! producer-side and emitted as one protocol line, and it reports uncaught
//! exceptions and unhandled rejections as `error`-level messages. Markup
//! input contributes only its `<script>` bodies; the sandboxed engine
//! executes script, not layout.

use crate::protocol::{RunId, PROTOCOL_SOURCE};

/// The instrumentation preamble, parameterized on the sentinel tag and the
/// run identifier. Serialization happens here, on the producer side of the
/// boundary: strings pass through, other values are JSON-encoded, and the
/// fallback chain ends in a fixed marker so emitting a message never throws.
const PREAMBLE_TEMPLATE: &str = r#"(function () {
  "use strict";
  var tag = "__SOURCE_TAG__";
  var runId = __RUN_ID__;

  function serialize(value) {
    if (typeof value === "string") return value;
    try {
      var encoded = JSON.stringify(value);
      if (encoded !== undefined) return encoded;
    } catch (_e) {}
    try {
      return String(value);
    } catch (_e) {}
    return "[unserializable]";
  }

  function emit(level, args) {
    var out = [];
    for (var i = 0; i < args.length; i++) out.push(serialize(args[i]));
    try {
      print(JSON.stringify({ source: tag, runId: runId, level: level, args: out }));
    } catch (_e) {}
  }

  var original = typeof console !== "undefined" ? console : {};
  function forward(level) {
    var native = original[level === "warn" ? "warn" : level];
    return function () {
      emit(level, arguments);
      if (typeof native === "function") {
        try { native.apply(original, arguments); } catch (_e) {}
      }
    };
  }

  globalThis.console = {
    log: forward("log"),
    info: forward("info"),
    warn: forward("warn"),
    error: forward("error")
  };

  globalThis.__consoleReportError = function (err) {
    var name = err && err.name ? err.name + ": " : "";
    var msg = err && err.message !== undefined ? String(err.message) : serialize(err);
    emit("error", ["Uncaught " + name + msg]);
  };

  if (typeof globalThis.addEventListener === "function") {
    globalThis.addEventListener("error", function (ev) {
      globalThis.__consoleReportError(ev.error !== undefined ? ev.error : ev.message);
    });
    globalThis.addEventListener("unhandledrejection", function (ev) {
      globalThis.__consoleReportError(ev.reason);
    });
  }
})();
"#;

/// Render the preamble for one run.
pub fn preamble(run_id: RunId) -> String {
    PREAMBLE_TEMPLATE
        .replace("__SOURCE_TAG__", PROTOCOL_SOURCE)
        .replace("__RUN_ID__", &run_id.raw().to_string())
}

/// Check whether the source looks like a markup document rather than bare
/// script code.
pub fn is_markup(source: &str) -> bool {
    source.trim_start().starts_with('<')
}

/// Extract the concatenated `<script>` bodies from a markup document.
pub fn extract_scripts(markup: &str) -> String {
    let mut scripts = String::new();
    // ASCII-only lowering keeps byte offsets aligned with the original.
    let lower = markup.to_ascii_lowercase();
    let mut search = 0;

    while let Some(open) = lower[search..].find("<script") {
        let open = search + open;
        let Some(tag_end) = lower[open..].find('>') else {
            break;
        };
        let body_start = open + tag_end + 1;
        let Some(close) = lower[body_start..].find("</script") else {
            break;
        };
        scripts.push_str(&markup[body_start..body_start + close]);
        scripts.push('\n');
        search = body_start + close;
    }

    scripts
}

/// Assemble the generated document for one run: preamble first, then the
/// user's script wrapped so a top-level throw becomes an `error` message
/// instead of killing the context silently.
pub fn build_document(run_id: RunId, source: &str) -> String {
    let user_script = if is_markup(source) {
        extract_scripts(source)
    } else {
        source.to_string()
    };

    let mut document = preamble(run_id);
    document.push_str("\n(function () { try {\n");
    document.push_str(&user_script);
    document.push_str("\n} catch (e) { globalThis.__consoleReportError(e); } })();\n");
    document
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preamble_carries_sentinel_and_run_id() {
        let text = preamble(RunId::from_raw(42));
        assert!(text.contains(PROTOCOL_SOURCE));
        assert!(text.contains("var runId = 42;"));
        assert!(!text.contains("__RUN_ID__"));
        assert!(!text.contains("__SOURCE_TAG__"));
    }

    #[test]
    fn test_is_markup() {
        assert!(is_markup("<!doctype html><p>hi</p>"));
        assert!(is_markup("  <div></div>"));
        assert!(!is_markup("console.log('hi')"));
        assert!(!is_markup("let x = 1 < 2;"));
    }

    #[test]
    fn test_extract_scripts_concatenates_bodies() {
        let markup = "<p>a</p><script>console.log(1)</script>\
                      <div></div><SCRIPT>console.log(2)</SCRIPT>";
        let scripts = extract_scripts(markup);
        assert!(scripts.contains("console.log(1)"));
        assert!(scripts.contains("console.log(2)"));
        assert!(!scripts.contains("<div>"));
    }

    #[test]
    fn test_extract_scripts_with_attributes() {
        let markup = r#"<script type="text/javascript">console.log("x")</script>"#;
        assert_eq!(extract_scripts(markup).trim(), r#"console.log("x")"#);
    }

    #[test]
    fn test_extract_scripts_ignores_unclosed() {
        assert!(extract_scripts("<script>console.log(1)").is_empty());
        assert!(extract_scripts("<p>no scripts</p>").is_empty());
    }

    #[test]
    fn test_build_document_preamble_precedes_user_source() {
        let doc = build_document(RunId::from_raw(1), "console.log('hi')");
        let preamble_pos = doc.find(PROTOCOL_SOURCE).unwrap();
        let user_pos = doc.find("console.log('hi')").unwrap();
        assert!(preamble_pos < user_pos);
    }

    #[test]
    fn test_build_document_from_markup() {
        let doc = build_document(
            RunId::from_raw(1),
            "<html><body><script>console.log('m')</script></body></html>",
        );
        assert!(doc.contains("console.log('m')"));
        assert!(!doc.contains("<body>"));
    }
}
