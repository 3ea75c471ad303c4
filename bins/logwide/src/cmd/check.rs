use logwide_engine::OutputConfig;

use crate::config::CheckArgs;
use crate::error::CliError;

pub fn run(args: CheckArgs) -> Result<(), CliError> {
    let config = OutputConfig::load(&args.config)?;
    let schema = config.validate()?;
    println!("{}", describe(&config, &schema));
    Ok(())
}

fn describe(config: &OutputConfig, schema: &logwide_api::EventSchema) -> String {
    let mut out = format!("table {}.{}\n", config.keyspace, config.table);
    for column in schema.columns() {
        out.push_str(&format!(
            "  {} {} <- {}\n",
            column.name, column.column_type, column.source
        ));
    }
    for (table, template) in &config.index_tables {
        out.push_str(&format!("index {table} <- {template}\n"));
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describes_schema_and_indexes() {
        let config = OutputConfig::parse(
            r#"
            keyspace = "logs"
            [index_tables]
            by_host = "%{@source_host}"
            "#,
        )
        .unwrap();
        let schema = config.validate().unwrap();
        assert_eq!(
            describe(&config, &schema),
            "table logs.logstash\n  ts timestamp <- @timestamp\n  message string <- @message\nindex by_host <- %{@source_host}"
        );
    }
}
