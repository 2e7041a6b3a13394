//! Terminal front-end pieces shared by the binary.
#![allow(missing_docs)]

pub mod live;

use crossterm::style::Color;

use crate::text::highlight::Style;

/// Normalized form of a style name: lowercase, no separators, `bright`
/// folded to `light`.
fn style_key(style: &Style) -> String {
    style
        .as_str()
        .to_ascii_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .replace("bright", "light")
}

/// Terminal color for a highlight style. Unknown names use the default
/// foreground.
#[must_use]
pub fn style_color(style: &Style) -> Option<Color> {
    let color = match style_key(style).as_str() {
        "black" => Color::Black,
        "red" => Color::Red,
        "darkred" => Color::DarkRed,
        "green" | "darkgreen" => Color::DarkGreen,
        "lightgreen" => Color::Green,
        "yellow" => Color::Yellow,
        "darkyellow" | "orange" => Color::DarkYellow,
        "blue" | "darkblue" => Color::DarkBlue,
        "lightblue" => Color::Blue,
        "magenta" | "purple" => Color::Magenta,
        "cyan" | "darkcyan" => Color::DarkCyan,
        "lightcyan" => Color::Cyan,
        "white" => Color::White,
        "gray" | "grey" => Color::Grey,
        "darkgray" | "darkgrey" => Color::DarkGrey,
        _ => return None,
    };
    Some(color)
}

/// Name understood by `colored` for the same style, for line-oriented output.
#[must_use]
pub fn style_color_name(style: &Style) -> Option<&'static str> {
    let name = match style_key(style).as_str() {
        "black" => "black",
        "red" | "darkred" => "red",
        "green" | "darkgreen" => "green",
        "lightgreen" => "bright green",
        "yellow" | "darkyellow" | "orange" => "yellow",
        "blue" | "darkblue" => "blue",
        "lightblue" => "bright blue",
        "magenta" | "purple" => "magenta",
        "cyan" | "darkcyan" => "cyan",
        "lightcyan" => "bright cyan",
        "white" => "white",
        "gray" | "grey" | "darkgray" | "darkgrey" => "bright black",
        _ => return None,
    };
    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn style_names_map_to_colors() {
        assert_eq!(style_color(&Style::new("red")), Some(Color::Red));
        assert_eq!(style_color(&Style::new("Light Green")), Some(Color::Green));
        assert_eq!(style_color(&Style::new("bright_green")), Some(Color::Green));
        assert_eq!(style_color(&Style::new("chartreuse")), None);
        assert_eq!(style_color_name(&Style::new("light green")), Some("bright green"));
    }
}
