use colored::Colorize;
use tabled::builder::Builder;
use tabled::settings::Style;

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

pub fn print_warning(msg: &str) {
    eprintln!("{} {}", "!".yellow(), msg);
}

/// Two-column key/value table.
pub fn print_pairs(header: [&str; 2], pairs: &[(String, String)]) {
    if pairs.is_empty() {
        println!("(none)");
        return;
    }
    let mut builder = Builder::default();
    builder.push_record(header);
    for (key, value) in pairs {
        builder.push_record([key.as_str(), value.as_str()]);
    }
    let table = builder.build().with(Style::rounded()).to_string();
    println!("{table}");
}
