//! Locators for the GMS report page. These must match the live markup.

use super::page::Dropdown;

pub const USERNAME_INPUT_ID: &str = "UserCtrl";
pub const PASSWORD_INPUT_ID: &str = "PwdCtrl";
pub const LOGIN_BUTTON_NAME: &str = "btnLogin";

pub const START_DATE_INPUT_ID: &str = "DataProviderDatePicker";
pub const END_DATE_INPUT_ID: &str = "EndDateDatePicker";
pub const SEARCH_BUTTON_ID: &str = "search";

pub const LOADING_INDICATOR_CLASS: &str = "k-loading-image";
pub const RESULT_ROWS_CSS: &str = ".k-grid-content tbody tr";

pub fn dropdown_xpath(dropdown: Dropdown) -> String {
    format!("(//span[@class='k-input'])[{}]", dropdown.position())
}

pub fn listbox_items_xpath(dropdown: Dropdown) -> &'static str {
    match dropdown {
        Dropdown::Network => "//ul[@id='NetworkCode_listbox']/li",
        Dropdown::MeasurementPoint => "//ul[contains(@id, 'MeasurePointDropDownList_listbox')]/li",
    }
}

/// Quotes `text` as an XPath string literal, falling back to `concat()` when
/// it contains both quote kinds.
pub fn xpath_literal(text: &str) -> String {
    if !text.contains('\'') {
        format!("'{}'", text)
    } else if !text.contains('"') {
        format!("\"{}\"", text)
    } else {
        let parts: Vec<String> = text.split('\'').map(|p| format!("'{}'", p)).collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}

pub fn option_xpath(dropdown: Dropdown, text: &str) -> String {
    format!(
        "{}[contains(text(), {})]",
        listbox_items_xpath(dropdown),
        xpath_literal(text)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dropdown_positions() {
        assert_eq!(dropdown_xpath(Dropdown::Network), "(//span[@class='k-input'])[1]");
        assert_eq!(
            dropdown_xpath(Dropdown::MeasurementPoint),
            "(//span[@class='k-input'])[2]"
        );
    }

    #[test]
    fn test_option_xpath_quoting() {
        assert_eq!(
            option_xpath(Dropdown::Network, "ABC-1"),
            "//ul[@id='NetworkCode_listbox']/li[contains(text(), 'ABC-1')]"
        );
        assert_eq!(
            option_xpath(Dropdown::MeasurementPoint, "MS1"),
            "//ul[contains(@id, 'MeasurePointDropDownList_listbox')]/li[contains(text(), 'MS1')]"
        );
        assert_eq!(xpath_literal("O'Neil"), "\"O'Neil\"");
        assert_eq!(
            xpath_literal(r#"a'b"c"#),
            r#"concat('a', "'", 'b"c')"#
        );
    }
}
