use crate::report::{format_percent, Report};
use xray_inference::GeneratorKind;

const STYLE: &str = "body{font-family:sans-serif;max-width:760px;margin:2em auto;padding:0 1em}\
pre{white-space:pre-wrap;background:#f5f5f5;padding:1em}\
table{border-collapse:collapse}td,th{padding:.3em 1em;border-bottom:1px solid #ddd}\
img{max-width:100%}";

pub fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <title>{}</title>\n<style>{}</style>\n</head>\n<body>\n{}\n</body>\n</html>\n",
        escape(title),
        STYLE,
        body
    )
}

fn llm_options() -> String {
    [GeneratorKind::Gpt2, GeneratorKind::GptNeo, GeneratorKind::Bart]
        .iter()
        .map(|kind| format!("<option value=\"{0}\">{0}</option>", kind.as_str()))
        .collect()
}

pub fn render_index() -> String {
    let body = format!(
        "<h1>Chest X-ray analysis</h1>\n\
         <form action=\"/predict\" method=\"post\" enctype=\"multipart/form-data\">\n\
         <p><input type=\"file\" name=\"image\" accept=\"image/*\" required></p>\n\
         <p><label>Report model <select name=\"llm\">{options}</select></label></p>\n\
         <p><button type=\"submit\">Analyze</button></p>\n\
         </form>\n\
         <h2>Ask a question</h2>\n\
         <form action=\"/chat\" method=\"post\">\n\
         <p><textarea name=\"user_input\" rows=\"3\" cols=\"60\"></textarea></p>\n\
         <p><label>Model <select name=\"llm\">{options}</select></label></p>\n\
         <p><button type=\"submit\">Send</button></p>\n\
         </form>",
        options = llm_options()
    );
    page("Chest X-ray analysis", &body)
}

pub fn render_result(report: &Report, image_url: &str) -> String {
    let rows: String = report
        .probabilities
        .iter()
        .map(|(condition, probability)| {
            format!(
                "<tr><td>{}</td><td>{}</td></tr>",
                escape(condition.label()),
                format_percent(probability)
            )
        })
        .collect();

    let notes = report
        .clinical_notes
        .as_deref()
        .map(|notes| format!("<h2>About this condition</h2>\n<p>{}</p>\n", escape(notes)))
        .unwrap_or_default();

    let body = format!(
        "<h1>Result: {condition}</h1>\n\
         <p>Confidence: {confidence}</p>\n\
         <img src=\"{image_url}\" alt=\"Uploaded X-ray\">\n\
         <h2>Probabilities</h2>\n\
         <table><tr><th>Label</th><th>Probability</th></tr>{rows}</table>\n\
         <h2>Report</h2>\n<pre>{narrative}</pre>\n\
         {notes}\
         <p><a href=\"/\">Analyze another image</a></p>",
        condition = escape(report.condition.label()),
        confidence = format_percent(report.confidence),
        image_url = escape(image_url),
        rows = rows,
        narrative = escape(&report.narrative),
        notes = notes,
    );
    page("Chest X-ray result", &body)
}
