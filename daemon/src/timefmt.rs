/// Filename and command templating.
///
/// Templates are strftime strings plus a handful of pipeline conversions:
///   `%v` event number, `%q` frame within the second, `%t` camera id,
///   `%D` changed pixels, `%C` event text.
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local};

/// Pipeline counters substituted into a template.
#[derive(Debug, Clone, Copy, Default)]
pub struct Placeholders<'a> {
    pub camera_id: u32,
    pub event_nr: u32,
    pub shots: u32,
    pub diffs: u32,
    pub text_event: &'a str,
}

/// Renders `template` at `time`. Never panics: an invalid strftime sequence
/// leaves the template text as-is apart from the pipeline conversions.
pub fn render(template: &str, time: &DateTime<Local>, vars: &Placeholders<'_>) -> String {
    let expanded = expand_placeholders(template, vars);
    let items = StrftimeItems::new(&expanded);
    if items.clone().any(|item| matches!(item, Item::Error)) {
        return expanded.replace("%%", "%");
    }
    time.format_with_items(items).to_string()
}

/// Replaces the pipeline conversions; everything else is left for chrono.
/// Substituted text has its `%` escaped so it survives the strftime pass.
fn expand_placeholders(template: &str, vars: &Placeholders<'_>) -> String {
    let mut out = String::with_capacity(template.len() + 16);
    let mut chars = template.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('v') => out.push_str(&format!("{:02}", vars.event_nr)),
            Some('q') => out.push_str(&format!("{:02}", vars.shots)),
            Some('t') => out.push_str(&vars.camera_id.to_string()),
            Some('D') => out.push_str(&vars.diffs.to_string()),
            Some('C') => out.push_str(&vars.text_event.replace('%', "%%")),
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }
    out
}
