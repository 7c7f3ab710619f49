pub mod handle_code_scan;
