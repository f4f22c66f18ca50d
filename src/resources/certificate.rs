use super::*;

/// cloudfront only accepts certificates issued in this region.
pub const CLOUDFRONT_CERTIFICATE_REGION: &str = "us-east-1";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CertificateValidation {
    /// validation records are written into the hosted zone automatically.
    #[default]
    #[serde(rename = "DNS", alias = "dns", alias = "Dns")]
    Dns,
}

/// This resource defines and creates an AWS ACM certificate. This only works if the following is true:
/// - The domain you'd like to get a certificate for is hosted in Amazon Route 53
/// - The hosted zone resides in the account you deploy to.
/// - You are using DNS validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcmCertificate {
    /// the domain you're requesting a certificate for. Must be fully qualified. Can have 1 optional wildcard.
    /// Examples of valid values:
    /// - www.mysite.com
    /// - multiple.sub.domains.mysite.com
    /// - mysite.com
    /// - *.mysite.com
    /// Examples of invalid values:
    /// - *.something.*.mysite.com
    /// - cannotendwithdot.com.
    pub domain_name: String,
    /// the hosted zone ID (without the `/hostedzone/` prefix) that receives the validation records.
    pub hosted_zone_id: String,
    pub validation: CertificateValidation,
}

impl CfnResource for AcmCertificate {
    fn type_string(&self) -> &'static str {
        "AWS::CertificateManager::Certificate"
    }
    fn properties(&self) -> Value {
        let method = match self.validation {
            CertificateValidation::Dns => "DNS",
        };
        json!({
            "DomainName": self.domain_name,
            "ValidationMethod": method,
            "DomainValidationOptions": [{
                "DomainName": self.domain_name,
                "HostedZoneId": self.hosted_zone_id,
            }],
        })
    }
    fn validate(&self) -> ConfigResult<()> {
        if self.domain_name.is_empty() {
            return Err(ConfigError::InvalidDomainConfig("Must provide a domain name for the certificate".into()));
        }
        if self.domain_name.ends_with('.') {
            return Err(ConfigError::InvalidDomainConfig(format!(
                "Certificate domain {} must not end with a dot", self.domain_name
            )));
        }
        if self.domain_name.contains('*') {
            if self.domain_name.matches('*').count() > 1 {
                return Err(ConfigError::InvalidDomainConfig(format!(
                    "Must only provide 1 wildcard. {} is invalid.", self.domain_name
                )));
            }
            if !self.domain_name.starts_with("*.") {
                return Err(ConfigError::InvalidDomainConfig(format!(
                    "If using a wildcard, it must be the first component of your domain, eg: \"*.something.com\". {} is invalid.",
                    self.domain_name
                )));
            }
        }
        if self.hosted_zone_id.is_empty() {
            return Err(ConfigError::InvalidDomainConfig(
                "Must provide the hosted zone ID of where your domain resides".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cert(domain: &str) -> AcmCertificate {
        AcmCertificate {
            domain_name: domain.into(),
            hosted_zone_id: "Z123".into(),
            validation: CertificateValidation::Dns,
        }
    }

    #[test]
    fn certificate_uses_dns_validation_against_zone() {
        let props = cert("test.example.com").properties();
        assert_eq!(props["DomainName"], "test.example.com");
        assert_eq!(props["ValidationMethod"], "DNS");
        assert_eq!(props["DomainValidationOptions"][0]["HostedZoneId"], "Z123");
    }

    #[test]
    fn wildcards_only_in_first_position() {
        assert!(cert("*.example.com").validate().is_ok());
        assert!(cert("a.*.example.com").validate().is_err());
        assert!(cert("*.*.example.com").validate().is_err());
        assert!(cert("example.com.").validate().is_err());
        assert!(cert("").validate().is_err());
        let mut no_zone = cert("example.com");
        no_zone.hosted_zone_id.clear();
        assert!(no_zone.validate().is_err());
    }
}
