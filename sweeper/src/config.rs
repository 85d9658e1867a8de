use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3302")]
    pub port: u16,

    #[envconfig(from = "PDF_STORAGE_PATH", default = "./data/pdfs")]
    pub pdf_storage_path: String,

    #[envconfig(from = "CLEANUP_INTERVAL_SECONDS", default = "1020")]
    pub cleanup_interval_seconds: u64,

    #[envconfig(from = "CLEANUP_FILE_AGE_SECONDS", default = "1020")]
    pub cleanup_file_age_seconds: u64,
}

impl Config {
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
