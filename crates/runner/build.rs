//! Build script for MediaGallery
//! Embeds Windows resource metadata

fn main() {
    #[cfg(windows)]
    {
        let mut res = winresource::WindowsResource::new();
        res.set("FileDescription", "Media Gallery Launcher");
        res.set("ProductName", "Media Gallery");
        res.set("InternalName", "MediaGallery");
        res.set("OriginalFilename", "MediaGallery.exe");
        res.set("CompanyName", "Media Gallery");
        res.set("LegalCopyright", "Copyright © 2026");
        if std::path::Path::new("favicon.ico").exists() {
            res.set_icon("favicon.ico");
        }

        if let Err(e) = res.compile() {
            println!("cargo:warning=Failed to compile Windows resources: {}", e);
        }
    }
}
