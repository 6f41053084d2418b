//! Feature vocabulary.
//!
//! Feature names come from a closed vocabulary. Scalar features carry one
//! value per event and can be filtered and plotted; non-scalar features
//! (images, masks, contours, traces) are only passed through.

/// Scalar features with their human-readable labels.
pub const SCALAR_FEATURES: [(&str, &str); 40] = [
    ("area_cvx", "Convex area [px]"),
    ("area_msd", "Measured area [px]"),
    ("area_ratio", "Porosity (convex to measured area ratio)"),
    ("area_um", "Area [µm²]"),
    ("aspect", "Aspect ratio of bounding box"),
    ("bright_avg", "Brightness average within contour [a.u.]"),
    ("bright_sd", "Brightness SD within contour [a.u.]"),
    ("circ", "Circularity"),
    ("deform", "Deformation"),
    ("emodulus", "Young's Modulus [kPa]"),
    ("fl1_area", "FL-1 area of peak [a.u.]"),
    ("fl1_max", "FL-1 maximum [a.u.]"),
    ("fl1_npeaks", "FL-1 number of peaks"),
    ("fl1_pos", "FL-1 position of peak [µs]"),
    ("fl1_width", "FL-1 width [µs]"),
    ("fl2_area", "FL-2 area of peak [a.u.]"),
    ("fl2_max", "FL-2 maximum [a.u.]"),
    ("fl2_npeaks", "FL-2 number of peaks"),
    ("fl2_pos", "FL-2 position of peak [µs]"),
    ("fl2_width", "FL-2 width [µs]"),
    ("fl3_area", "FL-3 area of peak [a.u.]"),
    ("fl3_max", "FL-3 maximum [a.u.]"),
    ("fl3_npeaks", "FL-3 number of peaks"),
    ("fl3_pos", "FL-3 position of peak [µs]"),
    ("fl3_width", "FL-3 width [µs]"),
    ("frame", "Video frame number"),
    ("index", "Event index"),
    ("inert_ratio_cvx", "Inertia ratio of convex contour"),
    ("inert_ratio_raw", "Inertia ratio of raw contour"),
    ("nevents", "Number of events in the same image"),
    ("pos_x", "Position along channel axis [µm]"),
    ("pos_y", "Position lateral in channel [µm]"),
    ("size_x", "Bounding box size x [µm]"),
    ("size_y", "Bounding box size y [µm]"),
    ("tilt", "Absolute tilt of raw contour"),
    ("time", "Event time [s]"),
    ("userdef0", "User defined 0"),
    ("userdef1", "User defined 1"),
    ("userdef2", "User defined 2"),
    ("volume", "Volume [µm³]"),
];

/// Features that are not one scalar per event.
pub const NON_SCALAR_FEATURES: [&str; 4] = ["contour", "image", "mask", "trace"];

/// Scalar features never offered as plot axes.
pub const IGNORED_AXES: [&str; 3] = ["frame", "index", "time"];

/// Features whose optimal plot range gets a safety band (see
/// [`crate::Analysis::get_feat_range_opt`]).
#[must_use]
pub fn has_safety_band(name: &str) -> bool {
    matches!(name, "area_um" | "deform") || (name.starts_with("fl") && name.ends_with("_max"))
}

/// Whether `name` is a scalar feature.
#[must_use]
pub fn is_scalar(name: &str) -> bool {
    SCALAR_FEATURES.iter().any(|(n, _)| *n == name)
}

/// Whether `name` is any known feature.
#[must_use]
pub fn is_valid(name: &str) -> bool {
    is_scalar(name) || NON_SCALAR_FEATURES.contains(&name)
}

/// Human-readable label of a scalar feature.
///
/// Returns the feature name for features without a label.
#[must_use]
pub fn label(name: &str) -> &str {
    SCALAR_FEATURES
        .iter()
        .find(|(n, _)| *n == name)
        .map_or(name, |(_, label)| label)
}

/// Short label without unit suffix, used for statistics headings.
#[must_use]
pub fn short_label(name: &str) -> &str {
    let full = label(name);
    full.split_once(" [").map_or(full, |(head, _)| head)
}

/// Splits a key such as `"deform min"` or `"kde accuracy area_um"` into the
/// feature it refers to, if any.
///
/// Recognised patterns: `<feature> min`, `<feature> max`,
/// `contour accuracy <feature>`, `kde accuracy <feature>`.
#[must_use]
pub fn feature_of_key(key: &str) -> Option<&str> {
    if let Some(feature) = key.strip_suffix(" min").or_else(|| key.strip_suffix(" max")) {
        return Some(feature);
    }
    key.strip_prefix("contour accuracy ")
        .or_else(|| key.strip_prefix("kde accuracy "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vocabulary() {
        assert!(is_scalar("deform"));
        assert!(is_scalar("inert_ratio_cvx"));
        assert!(!is_scalar("image"));
        assert!(is_valid("image"));
        assert!(!is_valid("defo"));
    }

    #[test]
    fn test_labels() {
        assert_eq!(short_label("deform"), "Deformation");
        assert_eq!(short_label("area_um"), "Area");
        assert_eq!(label("unknown_feature"), "unknown_feature");
    }

    #[test]
    fn test_feature_of_key() {
        assert_eq!(feature_of_key("deform min"), Some("deform"));
        assert_eq!(feature_of_key("fl1_max max"), Some("fl1_max"));
        assert_eq!(feature_of_key("kde accuracy area_um"), Some("area_um"));
        assert_eq!(feature_of_key("contour accuracy deform"), Some("deform"));
        assert_eq!(feature_of_key("enable filters"), None);
    }

    #[test]
    fn test_safety_band() {
        assert!(has_safety_band("fl2_max"));
        assert!(has_safety_band("deform"));
        assert!(!has_safety_band("fl2_width"));
        assert!(!has_safety_band("bright_avg"));
    }
}
