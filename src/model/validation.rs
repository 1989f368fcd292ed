use std::path::Path;

pub const MAX_NAME_LEN: usize = 100;
pub const MAX_DESCRIPTION_LEN: usize = 1000;

pub const ALLOWED_MODEL_EXTENSIONS: &[&str] = &["keras", "h5", "pt", "onnx"];
pub const ALLOWED_IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

pub(crate) const INPUT_TYPE_MESSAGE: &str = "inputType must be one of: image, text, json";

/// Collects every problem with the supplied metadata rather than stopping at the first.
pub fn validate_model_metadata(
    name: Option<&str>,
    description: Option<&str>,
    input_type: Option<&str>,
) -> Vec<String> {
    let mut errors = Vec::new();

    match name {
        Some(name) if !name.trim().is_empty() => {
            if name.chars().count() > MAX_NAME_LEN {
                errors.push(format!("Model name must be {} characters or less", MAX_NAME_LEN));
            }
        }
        _ => errors.push("Model name is required".to_string()),
    }

    if let Some(description) = description {
        if description.chars().count() > MAX_DESCRIPTION_LEN {
            errors.push(format!(
                "Description must be {} characters or less",
                MAX_DESCRIPTION_LEN
            ));
        }
    }

    if let Some(input_type) = input_type {
        if !input_type.is_empty() && !matches!(input_type, "image" | "text" | "json") {
            errors.push(INPUT_TYPE_MESSAGE.to_string());
        }
    }

    errors
}

pub fn is_valid_model_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

fn has_extension(filename: &str, allowed: &[&str]) -> bool {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|ext| allowed.iter().any(|a| a.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

pub fn is_allowed_model_extension(filename: &str) -> bool {
    has_extension(filename, ALLOWED_MODEL_EXTENSIONS)
}

pub fn is_allowed_image_extension(filename: &str) -> bool {
    has_extension(filename, ALLOWED_IMAGE_EXTENSIONS)
}
