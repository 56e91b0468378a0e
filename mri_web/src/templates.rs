//! Server-rendered pages for the browser flow.

use axum::http::StatusCode;
use mri_prediction::{Detection, ModelDescriptor, ModelKind};
use std::fmt::Write;

const STYLE: &str = "body{font-family:sans-serif;max-width:56rem;margin:2rem auto;padding:0 1rem}\
.card{border:1px solid #ddd;border-radius:6px;padding:1rem;margin:1rem 0}\
.muted{color:#777}img{max-width:100%}table{border-collapse:collapse}\
td,th{border:1px solid #ddd;padding:.3rem .6rem}";

pub fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <title>{title}</title>\n<style>{STYLE}</style>\n</head>\n<body>\n{body}\n</body>\n</html>\n",
        title = escape(title),
    )
}

pub fn home_page(models: &[ModelDescriptor]) -> String {
    let mut body = String::from("<h1>Brain MRI Tumor Detection</h1>\n");

    for model in models {
        let status = if model.available {
            ""
        } else {
            " <span class=\"muted\">(not available)</span>"
        };
        let _ = write!(
            body,
            "<div class=\"card\"><h3>{}{}</h3><p>{}</p></div>\n",
            escape(&model.name),
            status,
            escape(&model.description)
        );
    }

    body.push_str(
        "<form action=\"/detect\" method=\"post\" enctype=\"multipart/form-data\">\n\
         <label>Model <select name=\"model_type\">\n",
    );
    for model in models.iter().filter(|m| m.kind == ModelKind::Detector) {
        let _ = write!(
            body,
            "<option value=\"{}\"{}>{}</option>\n",
            escape(&model.key),
            if model.available { "" } else { " disabled" },
            escape(&model.name)
        );
    }
    body.push_str(
        "</select></label>\n\
         <input type=\"file\" name=\"file\" accept=\"image/*\" required>\n\
         <button type=\"submit\">Detect</button>\n</form>\n",
    );

    page("Brain MRI Tumor Detection", &body)
}

pub fn results_page(
    model: &ModelDescriptor,
    image_path: Option<&str>,
    annotated_png_base64: &str,
    detections: &[Detection],
) -> String {
    let mut body = format!(
        "<h1>Results</h1>\n<div class=\"card\"><h3>{}</h3><p>{}</p></div>\n",
        escape(&model.name),
        escape(&model.description)
    );

    let _ = write!(
        body,
        "<img alt=\"detections\" src=\"data:image/png;base64,{}\">\n",
        annotated_png_base64
    );
    if let Some(path) = image_path {
        let _ = write!(
            body,
            "<p><a href=\"{}\">Original upload</a></p>\n",
            escape(path)
        );
    }

    if detections.is_empty() {
        body.push_str("<p>No tumor detected.</p>\n");
    } else {
        body.push_str(
            "<table><tr><th>Class</th><th>Confidence</th><th>Box (x1, y1, x2, y2)</th></tr>\n",
        );
        for detection in detections {
            let b = detection.bbox;
            let _ = write!(
                body,
                "<tr><td>{}</td><td>{:.1}%</td><td>{:.0}, {:.0}, {:.0}, {:.0}</td></tr>\n",
                escape(&detection.class_label),
                detection.confidence * 100.,
                b.x1,
                b.y1,
                b.x2,
                b.y2
            );
        }
        body.push_str("</table>\n");
    }
    body.push_str("<p><a href=\"/\">Analyze another image</a></p>\n");

    page("Results", &body)
}

pub fn error_page(status: StatusCode, message: &str) -> String {
    let body = format!(
        "<h1>{}</h1>\n<p>{}</p>\n<p><a href=\"/\">Back</a></p>\n",
        status,
        escape(message)
    );
    page("Error", &body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mri_prediction::BoundingBox;

    #[test]
    fn test_escape() {
        assert_eq!(escape("<a href=\"x\">&'"), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;");
    }

    #[test]
    fn test_home_lists_detectors_in_form() {
        let mut unavailable =
            ModelDescriptor::new("yolov12", "YOLOv12", ModelKind::Detector, "next");
        unavailable.available = false;
        let models = vec![
            ModelDescriptor::new("yolo", "YOLO Model", ModelKind::Detector, "boxes"),
            ModelDescriptor::new("vgg16", "VGG16", ModelKind::Classifier, "Grad-CAM"),
            unavailable,
        ];

        let html = home_page(&models);

        assert!(html.contains("<option value=\"yolo\">YOLO Model</option>"));
        assert!(html.contains("<option value=\"yolov12\" disabled>YOLOv12</option>"));
        assert!(!html.contains("<option value=\"vgg16\""));
        assert!(html.contains("(not available)"));
    }

    #[test]
    fn test_results_page_lists_detections() {
        let model = ModelDescriptor::new("yolo", "YOLO Model", ModelKind::Detector, "boxes");
        let detections = vec![Detection {
            bbox: BoundingBox {
                x1: 270.,
                y1: 270.,
                x2: 370.,
                y2: 370.,
            },
            confidence: 0.9,
            class_probability: Some(0.9),
            class_id: 0,
            class_label: "Tumor".to_string(),
        }];

        let html = results_page(&model, Some("/static/uploads/a.png"), "AAAA", &detections);

        assert!(html.contains("<td>Tumor</td><td>90.0%</td><td>270, 270, 370, 370</td>"));
        assert!(html.contains("href=\"/static/uploads/a.png\""));
        assert!(html.contains("data:image/png;base64,AAAA"));
    }

    #[test]
    fn test_error_page_escapes_message() {
        let html = error_page(StatusCode::BAD_REQUEST, "<script>");
        assert!(html.contains("400 Bad Request"));
        assert!(html.contains("&lt;script&gt;"));
    }
}
