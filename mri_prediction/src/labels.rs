use crate::config::{LabelsConfig, Validatable};
use serde::Serialize;
use std::{
    fs::File,
    io::{self, BufRead},
    path::Path,
};

/// A detector class name with the color its boxes are drawn in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassLabel {
    pub label: String,
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl ClassLabel {
    pub fn new(label: &str, red: u8, green: u8, blue: u8) -> Self {
        Self {
            label: label.to_string(),
            red,
            green,
            blue,
        }
    }

    pub fn rgb(&self) -> [u8; 3] {
        [self.red, self.green, self.blue]
    }
}

pub fn default_labels() -> Vec<ClassLabel> {
    vec![ClassLabel::new("Tumor", 255, 0, 0)]
}

/// Resolves the label list of a detector, falling back to the single tumor class.
pub fn resolve_labels(labels_cfg: Option<&LabelsConfig>) -> Result<Vec<ClassLabel>, String> {
    match labels_cfg {
        None => Ok(default_labels()),
        Some(cfg) => {
            cfg.validate()?;
            load_labels(&cfg.get_path()).map_err(|e| format!("Failed to load labels: {}", e))
        }
    }
}

/// Name for a class index, tolerating indices past the end of the label file.
pub fn label_name(labels: &[ClassLabel], class_id: usize) -> String {
    labels
        .get(class_id)
        .map(|l| l.label.clone())
        .unwrap_or_else(|| format!("class {}", class_id))
}

/// Reads `label,red,green,blue` lines. Blank lines are skipped.
pub fn load_labels(filepath: &Path) -> io::Result<Vec<ClassLabel>> {
    let file = File::open(filepath)?;
    let reader = io::BufReader::new(file);
    let mut labels = Vec::new();

    for line_result in reader.lines() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split(',').collect();

        if parts.len() != 4 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Invalid line format: {}", line),
            ));
        }

        let channel = |value: &str, name: &str| -> io::Result<u8> {
            value.trim().parse().map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidData, format!("Invalid {} value", name))
            })
        };

        labels.push(ClassLabel {
            label: parts[0].trim().to_string(),
            red: channel(parts[1], "red")?,
            green: channel(parts[2], "green")?,
            blue: channel(parts[3], "blue")?,
        });
    }

    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_labels() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "Glioma, 255, 0, 0").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "Meningioma,0,255,0").unwrap();

        let labels = load_labels(file.path()).unwrap();
        assert_eq!(
            labels,
            vec![
                ClassLabel::new("Glioma", 255, 0, 0),
                ClassLabel::new("Meningioma", 0, 255, 0)
            ]
        );
    }

    #[test]
    fn test_load_labels_rejects_bad_channel() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "Glioma,300,0,0").unwrap();

        let err = load_labels(file.path()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_label_name_out_of_range() {
        let labels = default_labels();
        assert_eq!(label_name(&labels, 0), "Tumor");
        assert_eq!(label_name(&labels, 3), "class 3");
    }

    #[test]
    fn test_resolve_labels_defaults_to_tumor() {
        assert_eq!(resolve_labels(None).unwrap(), default_labels());
    }
}
