use std::sync::Arc;

use async_trait::async_trait;

use crate::{adb::Adb, error::Result, packages::PackageInfo};

/// App management on one device.
#[async_trait]
pub trait PackageManager: Send + Sync {
    async fn install_package(&self, serial: &str, file_path: &str) -> Result<()>;

    async fn get_all_installed_packages(&self, serial: &str) -> Result<Vec<PackageInfo>>;

    async fn get_installed_package(&self, serial: &str, package: &str)
        -> Result<Option<PackageInfo>>;

    async fn is_package_installed(&self, serial: &str, package: &str) -> Result<bool>;

    async fn uninstall_package(&self, serial: &str, package: &str) -> Result<()>;

    async fn launch(&self, serial: &str, package: &str) -> Result<()>;
}

pub struct AdbPackageManager {
    adb: Arc<dyn Adb>,
}

impl AdbPackageManager {
    pub fn new(adb: Arc<dyn Adb>) -> Self {
        Self { adb }
    }
}

#[async_trait]
impl PackageManager for AdbPackageManager {
    async fn install_package(&self, serial: &str, file_path: &str) -> Result<()> {
        self.adb.install_package(serial, file_path, false).await
    }

    async fn get_all_installed_packages(&self, serial: &str) -> Result<Vec<PackageInfo>> {
        self.adb.get_installed_packages(serial).await
    }

    async fn get_installed_package(
        &self,
        serial: &str,
        package: &str,
    ) -> Result<Option<PackageInfo>> {
        self.adb.get_installed_package(serial, package).await
    }

    async fn is_package_installed(&self, serial: &str, package: &str) -> Result<bool> {
        let found = self.adb.get_installed_package(serial, package).await?;
        Ok(found.is_some_and(|info| info.package_name == package))
    }

    async fn uninstall_package(&self, serial: &str, package: &str) -> Result<()> {
        self.adb.uninstall_package(serial, package).await
    }

    async fn launch(&self, serial: &str, package: &str) -> Result<()> {
        self.adb.launch_package(serial, package).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{package, FakeAdb};

    #[tokio::test]
    async fn installed_check_requires_exact_name() {
        let adb = FakeAdb::with_lists(Vec::new());
        adb.install(package("com.Example"));
        let manager = AdbPackageManager::new(adb.clone());

        assert!(manager.is_package_installed("sn1", "com.Example").await.unwrap());
        // the lookup itself matches loosely; the name check does not
        assert!(!manager.is_package_installed("sn1", "com.example").await.unwrap());
        assert!(!manager.is_package_installed("sn1", "com.other").await.unwrap());
    }

    #[tokio::test]
    async fn delegates_to_bridge() {
        let adb = FakeAdb::with_lists(Vec::new());
        let manager = AdbPackageManager::new(adb.clone());

        manager.install_package("sn1", "app.apk").await.unwrap();
        manager.uninstall_package("sn1", "com.a").await.unwrap();
        manager.launch("sn1", "com.a").await.unwrap();
        assert!(manager.get_all_installed_packages("sn1").await.unwrap().is_empty());

        assert_eq!(
            adb.calls(),
            vec![
                "install sn1 app.apk",
                "uninstall sn1 com.a",
                "launch sn1 com.a",
                "packages sn1",
            ]
        );
    }
}
