mod test_utils;

use fisclink::{FepError, FieldTable};
use log::*;

const HEADER: &str = "fieldNumber,name,description,fieldType,lengthType,length,dataEncoding,lengthEncoding,sensitive,paddingChar,leftPadding\n";

#[test]
fn test_010_field_table() {
    let mut _log_handle = test_utils::init_logger();
    loads_csv_with_comments_and_quotes();
    duplicate_keeps_last();
    parse_error_names_the_line();
    json_source();
    provider_cache_and_reload();
    env_override();
    info!("field table tests done");
}

fn loads_csv_with_comments_and_quotes() {
    info!("parse a CSV source with comments, blank lines, quoted fields");
    let source = format!(
        "{HEADER}\
         # card-present fields\n\
         \n\
         2,Pan,Primary account number,NUMERIC,LLVAR,19,BCD,BCD,true,,\n\
         43,Merchant,\"Name, city, country\",ALPHA_NUMERIC_SPECIAL,FIXED,40,EBCDIC,ASCII,false,,\n"
    );
    let table = FieldTable::from_csv("T", &source).unwrap();
    assert_eq!(table.len(), 2);
    assert_eq!(table.get(43).unwrap().description(), "Name, city, country");
    assert!(table.get(2).unwrap().sensitive());
}

fn duplicate_keeps_last() {
    info!("duplicate field numbers keep the later definition");
    let source = format!(
        "{HEADER}\
         41,TerminalA,,ALPHA_NUMERIC,FIXED,8,ASCII,ASCII,false,,\n\
         41,TerminalB,,ALPHA_NUMERIC,FIXED,16,ASCII,ASCII,false,,\n"
    );
    let table = FieldTable::from_csv("T", &source).unwrap();
    assert_eq!(table.len(), 1);
    assert_eq!(table.get(41).unwrap().name(), "TerminalB");
    assert_eq!(table.get(41).unwrap().length(), 16);
}

fn parse_error_names_the_line() {
    info!("unknown enum values fail with a line-numbered error");
    let source = format!(
        "{HEADER}\
         2,Pan,,NUMERIC,LLVAR,19,BCD,BCD,true,,\n\
         3,Processing,,NUMERIC,NOPE,6,BCD,BCD,false,,\n"
    );
    match FieldTable::from_csv("T", &source) {
        Err(FepError::Definition { line, reason }) => {
            assert_eq!(line, 3);
            assert!(reason.contains("NOPE"), "{reason}");
        }
        other => panic!("expected a definition error, got {other:?}"),
    }
}

fn json_source() {
    info!("JSON sources are equivalent to CSV ones");
    let source = r#"[
        {"fieldNumber": 11, "name": "Stan", "fieldType": "NUMERIC",
         "lengthType": "FIXED", "length": 6,
         "dataEncoding": "BCD", "lengthEncoding": "BCD"},
        {"fieldNumber": 39, "name": "ResponseCode", "fieldType": "ALPHA_NUMERIC",
         "lengthType": "FIXED", "length": 2,
         "dataEncoding": "ASCII", "lengthEncoding": "ASCII"}
    ]"#;
    let table = FieldTable::from_json("T", source).unwrap();
    assert_eq!(table.len(), 2);
    assert_eq!(table.get(11).unwrap().padding_char(), '0');
    assert!(table.get(11).unwrap().left_padding());
}

fn provider_cache_and_reload() {
    info!("the default provider is cached; reload swaps atomically");
    let first = fisclink::provider(fisclink::DEFAULT_PROVIDER).unwrap();
    let second = fisclink::provider(fisclink::DEFAULT_PROVIDER).unwrap();
    assert!(std::sync::Arc::ptr_eq(&first, &second));
    let reloaded = fisclink::reload_provider(fisclink::DEFAULT_PROVIDER).unwrap();
    assert!(!std::sync::Arc::ptr_eq(&first, &reloaded));
    // decoders holding the old Arc keep a consistent view
    assert_eq!(first.len(), reloaded.len());
}

fn env_override() {
    info!("an environment key points a provider at an external file");
    let path = std::env::temp_dir().join("fisclink_test_atmx_table.csv");
    std::fs::write(
        &path,
        format!("{HEADER}11,Stan,,NUMERIC,FIXED,6,BCD,BCD,false,,\n"),
    )
    .unwrap();
    std::env::set_var("FISCLINK_FIELD_TABLE_ATMX", &path);
    let table = fisclink::provider("ATMX").unwrap();
    assert_eq!(table.len(), 1);
    fisclink::clear_provider("ATMX").unwrap();
    std::env::remove_var("FISCLINK_FIELD_TABLE_ATMX");
    let _ = std::fs::remove_file(&path);
}
