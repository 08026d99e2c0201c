//! Styled help text for the CLI.

use console::style;

use crate::display::theme::Theme;

/// Format a help section with a styled title
pub fn format_help_section(title: &str, content: &str) -> String {
    let mut output = if Theme::should_disable_colors() {
        format!("{title}\n")
    } else {
        format!("{}\n", style(title).cyan().bold())
    };

    for line in content.lines() {
        if line.trim().is_empty() {
            output.push('\n');
        } else {
            output.push_str(&format!("    {line}\n"));
        }
    }
    output
}

/// Text shown after the generated command list
pub fn create_help_text() -> String {
    let quick_start = r#"$ bugfuse init                          # Write .bugfuse/settings.toml
$ bugfuse rebuild                       # Index the bug report file
$ bugfuse search --summary "parser throws null pointer""#;

    let examples = r#"# Combine fields; missing ones are left out of the fusion
$ bugfuse search --summary "crash on save" --log "NullPointerException"

# Override weights for one query
$ bugfuse search --code "fn parse" --weights "code=0.6,summary=0.4"

# Keep a snapshot forever, then prune the rest
$ bugfuse snapshots mark 20240501T101500123Z-v7
$ bugfuse snapshots prune"#;

    let mut help = format_help_section("QUICK START", quick_start);
    help.push('\n');
    help.push_str(&format_help_section("EXAMPLES", examples));
    help
}
