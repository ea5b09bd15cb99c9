//! Table and JSON rendering of resolved people.

use anyhow::{Context, Result};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};

use persondir_core::person::{Person, PersonSet};
use persondir_core::query::{render_value, AttributeValues};
use persondir_core::source::AttributeNames;

use crate::style::{self, Absent};

fn render_values(values: Option<&AttributeValues>) -> Cell {
    match values {
        None => style::absent_cell(Absent::Null),
        Some(values) if values.is_empty() => style::absent_cell(Absent::Empty),
        Some(values) => Cell::new(
            values
                .iter()
                .map(|v| render_value(v).unwrap_or_else(|| "null".to_string()))
                .collect::<Vec<_>>()
                .join("\n"),
        ),
    }
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(header);
    table
}

/// Print one person as an attribute table.
pub fn print_person(person: &Person) {
    println!();
    println!(
        "{}",
        style::header(&format!(
            "Person: {}",
            person.name().unwrap_or(Absent::Unnamed.label())
        ))
    );
    println!();

    if person.attributes().is_empty() {
        println!("{}", style::absent(Absent::None));
        return;
    }

    let mut table = new_table(vec!["Attribute", "Values"]);
    for (name, values) in person.attributes() {
        table.add_row(vec![Cell::new(name), render_values(values.as_ref())]);
    }
    println!("{}", table);
    println!();
}

/// Print several people, one row per attribute.
pub fn print_people(people: &PersonSet) {
    let mut table = new_table(vec!["Person", "Attribute", "Values"]);
    for person in people {
        let name = person.name().unwrap_or(Absent::Unnamed.label());
        if person.attributes().is_empty() {
            table.add_row(vec![Cell::new(name), Cell::new(""), Cell::new("")]);
        }
        for (attribute, values) in person.attributes() {
            table.add_row(vec![
                Cell::new(name),
                Cell::new(attribute),
                render_values(values.as_ref()),
            ]);
        }
    }
    println!();
    println!("{}", table);
    println!();
    println!("{} person(s) found", people.len());
}

/// Print attribute names, or a note when the sources cannot tell.
pub fn print_names(title: &str, names: Option<&AttributeNames>) {
    println!("{}", style::header(title));
    match names {
        None => println!("  {}", style::absent(Absent::Unknown)),
        Some(names) if names.is_empty() => println!("  {}", style::absent(Absent::None)),
        Some(names) => {
            for name in names {
                println!("  {}", name);
            }
        }
    }
}

/// Pretty-printed JSON on stdout.
pub fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    println!("{}", json);
    Ok(())
}
