use anyhow::Result;
use comfy_table::{Attribute, Cell, Color, ContentArrangement, Table};

use super::ProcessRow;

pub struct TermPrinted;

pub trait TermPrintable {
    fn term_print(&self) -> Result<TermPrinted>;
}

impl TermPrintable for Vec<ProcessRow> {
    fn term_print(&self) -> Result<TermPrinted> {
        println!("{}", process_table(self));
        Ok(TermPrinted)
    }
}

fn process_table(rows: &[ProcessRow]) -> Table {
    let mut table = table();

    table.set_header(vec![
        Cell::new("PID").add_attribute(Attribute::Bold),
        Cell::new("VERSION").add_attribute(Attribute::Bold),
        Cell::new("IMAGE").add_attribute(Attribute::Bold),
        Cell::new("AGE").add_attribute(Attribute::Bold),
        Cell::new("RETAIN").add_attribute(Attribute::Bold),
        Cell::new("PARENTS").add_attribute(Attribute::Bold),
    ]);

    for row in rows {
        let retain_color = match (row.tombstoned, row.retain_count) {
            (true, _) => Color::Red,
            (false, 0) => Color::White,
            (false, _) => Color::Green,
        };
        let age = match row.age {
            Some(age) => format!("{}s", age.as_secs()),
            None => "-".to_string(),
        };

        table.add_row(vec![
            Cell::new(row.key.pid)
                .fg(Color::Cyan)
                .add_attribute(Attribute::Bold),
            Cell::new(row.key.version),
            Cell::new(&row.image),
            Cell::new(age),
            Cell::new(row.retain_count)
                .fg(retain_color)
                .add_attribute(Attribute::Bold),
            Cell::new(row.parents.join(" < ")),
        ]);
    }

    table
}

fn table() -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table
}
